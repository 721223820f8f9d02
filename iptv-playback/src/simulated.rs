//! Stand-in collaborators for the `iptv-playback` binary
//!
//! A player engine that fails a configurable number of opens before
//! succeeding, and an in-memory schedule built around start-up time.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use iptv_playback::playback::{EngineError, MediaSource, PlayerEngine};
use iptv_playback::schedule::{ScheduleItem, ScheduleSource, SourceError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info};

/// Engine whose first `failures` opens report a network error
pub struct FlakyEngine {
    remaining_failures: AtomicU32,
}

impl FlakyEngine {
    pub fn new(failures: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl PlayerEngine for FlakyEngine {
    async fn open(&self, source: &MediaSource) -> Result<(), EngineError> {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EngineError::Network(format!("connection reset by {}", source.url)));
        }
        info!(source = %source, "Simulated engine playing");
        Ok(())
    }

    fn stop(&self) {
        debug!("Simulated engine stopped");
    }
}

/// Three back-to-back half-hour programmes per channel, anchored at `origin`
pub struct InMemorySchedule {
    programmes: HashMap<String, Vec<ScheduleItem>>,
}

impl InMemorySchedule {
    pub fn new(origin: DateTime<Utc>, channels: &[&str]) -> Self {
        let programmes = channels
            .iter()
            .map(|channel| {
                let items = (0..3)
                    .map(|slot| {
                        let start = origin + Duration::minutes(30 * (slot - 1));
                        ScheduleItem {
                            entity_id: channel.to_string(),
                            title: format!("{} programme {}", channel, slot + 1),
                            description: None,
                            start,
                            end: start + Duration::minutes(30),
                        }
                    })
                    .collect();
                (channel.to_string(), items)
            })
            .collect();
        Self { programmes }
    }

    fn find(&self, entity_id: &str, pick: impl Fn(&ScheduleItem) -> bool) -> Option<ScheduleItem> {
        self.programmes
            .get(entity_id)
            .and_then(|items| items.iter().find(|item| pick(*item)).cloned())
    }
}

#[async_trait]
impl ScheduleSource for InMemorySchedule {
    async fn fetch_current(
        &self,
        entity_id: &str,
        _owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleItem>, SourceError> {
        Ok(self.find(entity_id, |item| item.is_airing_at(now)))
    }

    async fn fetch_next(
        &self,
        entity_id: &str,
        _owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleItem>, SourceError> {
        Ok(self.find(entity_id, |item| item.start > now))
    }

    async fn fetch_current_batch(
        &self,
        entity_ids: &[String],
        owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, ScheduleItem>, SourceError> {
        let mut found = HashMap::new();
        for entity_id in entity_ids {
            if let Some(item) = self.fetch_current(entity_id, owner_id, now).await? {
                found.insert(entity_id.clone(), item);
            }
        }
        Ok(found)
    }
}
