//! Interfaces the HTTP and WebSocket layers implement.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use super::ScriptError;

/// An inbound document request a script renders into.
pub trait DocumentRequest: Send + Sync {
    /// Short description for logs, e.g. `GET /index`.
    fn describe(&self) -> String;

    /// Append script output to the response body.
    fn append(&self, text: &str);

    /// Send the collected body. Called once.
    fn respond(&self);

    /// Send an error page instead. Called once, never after `respond`.
    fn respond_error(&self, error: &ScriptError);
}

/// Identity of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("connection closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

/// A long-lived client connection (WebSocket).
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn send(&self, message: &str) -> Result<(), HostError>;

    /// Tell the client a script run on its behalf failed.
    fn report_failure(&self, error: &ScriptError);
}
