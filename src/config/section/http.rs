//! `[http]` section configuration.
//!
//! Outbound calls made by scripts with `fetch`.
//!
//! # Example
//!
//! ```toml
//! [http]
//! timeout_ms = 10000
//! user_agent = "weaver"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Connect/read/write timeout for one call, in milliseconds.
    pub timeout_ms: u64,

    /// `User-Agent` header sent with every call.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            user_agent: concat!("weaver/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "http.timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_http_config() {
        let config = test_parse_config("[http]\ntimeout_ms = 250");
        assert_eq!(config.http.timeout().as_millis(), 250);
        assert!(config.http.user_agent.starts_with("weaver/"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = test_parse_config("[http]\ntimeout_ms = 0");
        assert!(config.http.validate().is_err());
    }
}
