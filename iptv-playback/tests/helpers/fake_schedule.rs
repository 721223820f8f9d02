//! Counting schedule source
//!
//! Every query returns a programme titled `call-<n>`, where `n` is the
//! global query counter, so a test can tell a cached answer from a fresh one.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use iptv_playback::schedule::{ScheduleItem, ScheduleSource, SourceError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// What the source answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// A numbered programme for every entity
    Present,
    /// Nothing scheduled anywhere
    Absent,
    /// Every query fails
    Failing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRecord {
    pub kind: &'static str,
    pub entity_ids: Vec<String>,
    pub owner_id: String,
}

pub struct CountingSource {
    mode: Mutex<SourceMode>,
    counter: AtomicU64,
    queries: Mutex<Vec<QueryRecord>>,
}

impl CountingSource {
    pub fn new(mode: SourceMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            counter: AtomicU64::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: SourceMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Total queries of every kind
    pub fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn calls_of(&self, kind: &str) -> usize {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.kind == kind)
            .count()
    }

    pub fn calls_for_owner(&self, owner_id: &str) -> usize {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.owner_id == owner_id)
            .count()
    }

    pub fn queries(&self) -> Vec<QueryRecord> {
        self.queries.lock().unwrap().clone()
    }

    fn record(&self, kind: &'static str, entity_ids: Vec<String>, owner_id: &str) -> u64 {
        self.queries.lock().unwrap().push(QueryRecord {
            kind,
            entity_ids,
            owner_id: owner_id.to_string(),
        });
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn answer(&self, n: u64, entity_id: &str, now: DateTime<Utc>) -> Result<Option<ScheduleItem>, SourceError> {
        match *self.mode.lock().unwrap() {
            SourceMode::Present => Ok(Some(ScheduleItem {
                entity_id: entity_id.to_string(),
                title: format!("call-{}", n),
                description: None,
                start: now - Duration::minutes(10),
                end: now + Duration::minutes(20),
            })),
            SourceMode::Absent => Ok(None),
            SourceMode::Failing => Err(SourceError::Unavailable("database locked".to_string())),
        }
    }
}

#[async_trait]
impl ScheduleSource for CountingSource {
    async fn fetch_current(
        &self,
        entity_id: &str,
        owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleItem>, SourceError> {
        let n = self.record("current", vec![entity_id.to_string()], owner_id);
        self.answer(n, entity_id, now)
    }

    async fn fetch_next(
        &self,
        entity_id: &str,
        owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleItem>, SourceError> {
        let n = self.record("next", vec![entity_id.to_string()], owner_id);
        self.answer(n, entity_id, now)
    }

    async fn fetch_current_batch(
        &self,
        entity_ids: &[String],
        owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, ScheduleItem>, SourceError> {
        let n = self.record("batch", entity_ids.to_vec(), owner_id);
        let mut found = HashMap::new();
        for entity_id in entity_ids {
            if let Some(item) = self.answer(n, entity_id, now)? {
                found.insert(entity_id.clone(), item);
            }
        }
        Ok(found)
    }
}
