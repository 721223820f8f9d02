//! Playback session control: lease, retry and coordination

pub mod coordinator;
pub mod engine;
pub mod lease;
pub mod retry;

pub use coordinator::{PlayResult, PlaybackCoordinator};
pub use engine::{EngineError, MediaSource, PlayerEngine};
pub use lease::{CooldownWindow, Denial, LeaseManager, LeaseState};
pub use retry::{AttemptOutcome, RetryCallbacks, RetryController, RetryPolicy};
