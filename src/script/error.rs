//! Script-side error types.

use std::fmt;
use thiserror::Error;

use super::{ContinuationToken, TriggerKind};

/// A script raised an error, or could not run at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    message: String,
    line: Option<usize>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }

    /// Error attributed to a 1-based source line.
    pub fn at(line: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn line(&self) -> Option<usize> {
        self.line
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ScriptError {}

/// Failure result of a continuation trigger, injected at the suspend point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("module `{identifier}` could not be loaded: {reason}")]
    ModuleLoad { identifier: String, reason: String },

    #[error("module `{identifier}` failed to initialize: {reason}")]
    ModuleInit { identifier: String, reason: String },

    #[error("`{identifier}` is not a valid module identifier")]
    InvalidModule { identifier: String },

    #[error("module `{identifier}` requires itself while initializing: {chain}")]
    CyclicRequire { identifier: String, chain: String },

    #[error("{method} {url} failed: {reason}")]
    Http {
        method: String,
        url: String,
        reason: String,
    },

    #[error("{method} {url} timed out after {timeout_ms}ms")]
    Timeout {
        method: String,
        url: String,
        timeout_ms: u64,
    },

    #[error("no connection to receive a message from")]
    NoConnection,

    #[error("connection closed before a message arrived")]
    ConnectionClosed,

    #[error("no processor handles {0} triggers")]
    NoProcessor(TriggerKind),

    #[error("trigger ended without a result")]
    Abandoned,
}

/// A result could not be delivered to a continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResumeError {
    #[error("continuation {0} was already resumed")]
    AlreadyConsumed(ContinuationToken),

    #[error("continuation {0} was never issued")]
    Unknown(ContinuationToken),

    #[error("scheduler has shut down")]
    ShutDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_error_display() {
        assert_eq!(ScriptError::new("boom").to_string(), "boom");
        assert_eq!(ScriptError::at(3, "boom").to_string(), "line 3: boom");
    }
}
