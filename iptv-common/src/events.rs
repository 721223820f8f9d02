//! Event types for the playback event system
//!
//! Provides the shared [`PlaybackEvent`] enum and the [`EventBus`] every
//! playback surface subscribes to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why a playback request was refused
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Another owner holds the lease
    LeaseHeld,
    /// A cooldown window is still open after the last release
    Cooldown,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::LeaseHeld => write!(f, "lease held"),
            DenialReason::Cooldown => write!(f, "cooldown"),
        }
    }
}

/// Playback lifecycle events
///
/// Events are broadcast via [`EventBus`] and serialize with a `type` tag so
/// UI layers can forward them unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PlaybackEvent {
    /// A playback request was refused by the single-connection policy
    ///
    /// UI should offer the user a "stop the other session?" prompt.
    LeaseDenied {
        owner_id: String,
        reason: DenialReason,
        /// Cooldown left at the time of the denial (0 for `LeaseHeld`)
        remaining_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An open attempt is starting
    RetryAttempt {
        owner_id: String,
        source: String,
        /// 1-based attempt number
        attempt: u32,
        max_attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// The engine opened the source
    PlaybackStarted {
        owner_id: String,
        source: String,
        timestamp: DateTime<Utc>,
    },

    /// Every attempt failed; no further automatic recovery
    ///
    /// UI should offer a manual retry or a different source.
    PlaybackFailed {
        owner_id: String,
        source: String,
        attempts: u32,
        /// Text of the last engine error, if the last attempt produced one
        last_error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Playback was stopped and the lease released
    PlaybackStopped {
        owner_id: String,
        cooldown_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl PlaybackEvent {
    /// Owner the event concerns
    pub fn owner_id(&self) -> &str {
        match self {
            PlaybackEvent::LeaseDenied { owner_id, .. }
            | PlaybackEvent::RetryAttempt { owner_id, .. }
            | PlaybackEvent::PlaybackStarted { owner_id, .. }
            | PlaybackEvent::PlaybackFailed { owner_id, .. }
            | PlaybackEvent::PlaybackStopped { owner_id, .. } => owner_id,
        }
    }

    /// Whether this event ends an open sequence (started or failed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlaybackEvent::PlaybackStarted { .. } | PlaybackEvent::PlaybackFailed { .. }
        )
    }
}

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use iptv_common::events::{EventBus, PlaybackEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(PlaybackEvent::PlaybackStopped {
///     owner_id: "player".to_string(),
///     cooldown_ms: 0,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlaybackEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, returning the number of subscribers reached
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlaybackEvent,
    ) -> Result<usize, broadcast::error::SendError<PlaybackEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlaybackEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stopped(owner: &str) -> PlaybackEvent {
        PlaybackEvent::PlaybackStopped {
            owner_id: owner.to_string(),
            cooldown_ms: 2000,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PlaybackEvent::LeaseDenied {
            owner_id: "pip".to_string(),
            reason: DenialReason::Cooldown,
            remaining_ms: 1500,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "LeaseDenied");
        assert_eq!(json["reason"], "cooldown");
        assert_eq!(json["remaining_ms"], 1500);

        let back: PlaybackEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_owner_id_and_terminal_classification() {
        let event = stopped("preview");
        assert_eq!(event.owner_id(), "preview");
        assert!(!event.is_terminal());

        let failed = PlaybackEvent::PlaybackFailed {
            owner_id: "main".to_string(),
            source: "http://example.invalid/live.ts".to_string(),
            attempts: 5,
            last_error: None,
            timestamp: Utc::now(),
        };
        assert!(failed.is_terminal());
    }

    #[tokio::test]
    async fn test_event_bus_fan_out() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.emit(stopped("main")).unwrap(), 2);

        assert_eq!(rx1.recv().await.unwrap().owner_id(), "main");
        assert_eq!(rx2.recv().await.unwrap().owner_id(), "main");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert!(bus.emit(stopped("main")).is_err());
        // Lossy variant must not panic either
        bus.emit_lossy(stopped("main"));
        assert_eq!(bus.capacity(), 4);
    }
}
