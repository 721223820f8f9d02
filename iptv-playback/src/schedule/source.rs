//! Schedule data source contract
//!
//! Implemented outside this crate (EPG database, provider API). The cache
//! only reads from it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// One programme in a channel's schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleItem {
    /// Channel (EPG entity) the programme airs on
    pub entity_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ScheduleItem {
    /// Whether the programme is on air at `at` (start inclusive, end exclusive)
    pub fn is_airing_at(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    /// Fraction of the programme elapsed at `at`, clamped to `0.0..=1.0`
    pub fn progress_at(&self, at: DateTime<Utc>) -> f64 {
        let total = (self.end - self.start).num_milliseconds();
        if total <= 0 {
            return if at >= self.end { 1.0 } else { 0.0 };
        }
        let elapsed = (at - self.start).num_milliseconds();
        (elapsed as f64 / total as f64).clamp(0.0, 1.0)
    }
}

/// Data source failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Schedule source unavailable: {0}")]
    Unavailable(String),

    #[error("Schedule query failed: {0}")]
    Query(String),
}

/// Read-only schedule lookups keyed by entity and owner (account)
///
/// `Ok(None)` means "nothing scheduled" and is cached; `Err` is not.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// Programme airing at `now`
    async fn fetch_current(
        &self,
        entity_id: &str,
        owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleItem>, SourceError>;

    /// First programme starting after `now`
    async fn fetch_next(
        &self,
        entity_id: &str,
        owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleItem>, SourceError>;

    /// Programmes airing at `now` for several entities; entities with
    /// nothing scheduled are absent from the map
    async fn fetch_current_batch(
        &self,
        entity_ids: &[String],
        owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, ScheduleItem>, SourceError>;
}
