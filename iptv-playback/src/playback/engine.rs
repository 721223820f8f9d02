//! Player engine contract
//!
//! The coordinator depends only on this narrow interface, never on a
//! concrete media library. Decode/network failures that happen after a
//! successful open are reported back through
//! [`PlaybackCoordinator::on_engine_error`](super::PlaybackCoordinator::on_engine_error).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Something the engine can open: a live channel, VOD item or catch-up URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaSource {
    pub url: String,
    /// Display name for logs and UI (channel or title)
    pub name: Option<String>,
}

impl MediaSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
        }
    }

    pub fn named(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: Some(name.into()),
        }
    }
}

impl std::fmt::Display for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.url),
            None => write!(f, "{}", self.url),
        }
    }
}

/// Engine failure kinds
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Source could not be opened (bad URL, HTTP error, unsupported container)
    #[error("Failed to open {url}: {reason}")]
    Open { url: String, reason: String },

    /// Decoder failed mid-stream
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Network dropped or stalled
    #[error("Network error: {0}")]
    Network(String),

    /// Engine broke its own contract (e.g. callback after stop)
    #[error("Engine contract violation: {0}")]
    ContractViolation(String),
}

impl EngineError {
    /// Whether a retry of the same source can reasonably succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, EngineError::ContractViolation(_))
    }
}

/// Media player engine driven by the coordinator
#[async_trait]
pub trait PlayerEngine: Send + Sync {
    /// Open and start playing `source`
    async fn open(&self, source: &MediaSource) -> Result<(), EngineError>;

    /// Stop whatever is playing; must be idempotent and non-blocking
    fn stop(&self);
}
