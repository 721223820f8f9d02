//! Error types for iptv-playback
//!
//! Policy denials and cache misses are not errors; they travel as return
//! values. These types cover collaborator failures and terminal outcomes.

use thiserror::Error;

/// Main error type for iptv-playback
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Player engine failures
    #[error("Engine error: {0}")]
    Engine(#[from] crate::playback::EngineError),

    /// Every retry attempt failed
    #[error("Playback of {source_url} failed after {attempts} attempts")]
    RetryExhausted { source_url: String, attempts: u32 },

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<iptv_common::Error> for Error {
    fn from(err: iptv_common::Error) -> Self {
        match err {
            iptv_common::Error::Config(msg) => Error::Config(msg),
            iptv_common::Error::TomlParse(e) => Error::Config(e.to_string()),
            other => Error::Internal(other.to_string()),
        }
    }
}

/// Convenience Result type using iptv-playback Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::EngineError;

    #[test]
    fn test_common_config_errors_stay_config_errors() {
        let err = Error::from(iptv_common::Error::Config("bad ttl".to_string()));
        assert!(matches!(err, Error::Config(ref msg) if msg == "bad ttl"));

        let parse = iptv_common::config::CoreConfig::from_toml_str("[playback").unwrap_err();
        assert!(matches!(Error::from(parse), Error::Config(_)));
    }

    #[test]
    fn test_io_errors_become_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = Error::from(iptv_common::Error::from(io));
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_messages() {
        let err = Error::RetryExhausted {
            source_url: "http://iptv.invalid/live.ts".to_string(),
            attempts: 5,
        };
        assert_eq!(
            err.to_string(),
            "Playback of http://iptv.invalid/live.ts failed after 5 attempts"
        );
        let err = Error::from(EngineError::Network("reset".to_string()));
        assert_eq!(err.to_string(), "Engine error: Network error: reset");
    }
}
