//! # IPTV Common Library
//!
//! Shared code for the IPTV playback crates:
//! - Error type and result alias
//! - Clock abstraction and timestamp helpers
//! - Configuration loading (TOML with built-in defaults)
//! - Playback event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use time::{Clock, ManualClock, SystemClock};
