//! Test helper modules for iptv-playback integration tests
//!
//! Provides fake collaborators for the playback core:
//! - ScriptedEngine: player engine with a scripted sequence of open results
//! - CountingSource: schedule source that counts and numbers every query
//! - Event helpers for waiting on coordinator events under paused time

#![allow(dead_code)]

pub mod fake_engine;
pub mod fake_schedule;

pub use fake_engine::ScriptedEngine;
pub use fake_schedule::{CountingSource, SourceMode};

use iptv_common::events::PlaybackEvent;
use std::time::Duration;
use tokio::sync::broadcast;

/// Receive events until one matches `predicate`
///
/// Panics after 10 simulated minutes so a missing event fails the test
/// instead of hanging it.
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<PlaybackEvent>,
    predicate: impl Fn(&PlaybackEvent) -> bool,
) -> PlaybackEvent {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("Event bus closed: {}", e),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), wait)
        .await
        .expect("Timed out waiting for playback event")
}

/// Drain every event already queued on `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
