//! # IPTV Playback Session Control Core (iptv-playback)
//!
//! Arbitrates which playback surface may stream at any instant, masks
//! transient engine failures with bounded retries, and keeps schedule
//! ("now/next") lookups hot in an expiring cache.
//!
//! **Architecture:**
//! - [`playback::LeaseManager`]: single global playback permission with cooldown
//! - [`playback::RetryController`]: cancellable exponential-backoff retry loop
//! - [`playback::PlaybackCoordinator`]: the call surface UI components use
//! - [`schedule::ScheduleCache`]: TTL cache in front of a schedule data source

pub mod error;
pub mod playback;
pub mod schedule;

pub use error::{Error, Result};
