//! Expiring schedule cache
//!
//! Three tables sit in front of a [`ScheduleSource`]:
//! - `current`: programme on air now, per (entity, owner)
//! - `next`: programme after that, per (entity, owner)
//! - `batch_current`: on-air map for a whole entity set, per (sorted entities, owner)
//!
//! "Nothing scheduled" is cached like any other answer so repeated misses
//! stay off the source. Source errors are never cached.
//!
//! Eviction is lazy: when an insert pushes the total past `max_entries`,
//! every table is swept of entries older than the TTL. Staleness is
//! bounded; absolute size under sustained fresh inserts is not.
//!
//! The read-check-then-fill sequence is not atomic; two racing misses may
//! both query the source and the later insert wins.

use crate::schedule::source::{ScheduleItem, ScheduleSource};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use iptv_common::config::CacheSettings;
use iptv_common::time::{elapsed_ms, Clock};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Cache freshness and size threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// Total entries (all tables) above which an expiry sweep runs
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            max_entries: 1000,
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            ttl: settings.ttl(),
            max_entries: settings.max_entries,
        }
    }
}

/// Key of the single-entity tables
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub entity_id: String,
    pub owner_id: String,
}

impl EntryKey {
    pub fn new(entity_id: &str, owner_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            owner_id: owner_id.to_string(),
        }
    }
}

/// Key of the batch table: the requested entity set, sorted and deduplicated
///
/// Requests for the same set in any order share one entry. The owner is a
/// separate field so owner invalidation compares it exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    entity_ids: Vec<String>,
    owner_id: String,
}

impl BatchKey {
    pub fn new(entity_ids: &[String], owner_id: &str) -> Self {
        let mut entity_ids = entity_ids.to_vec();
        entity_ids.sort_unstable();
        entity_ids.dedup();
        Self {
            entity_ids,
            owner_id: owner_id.to_string(),
        }
    }

    pub fn entity_ids(&self) -> &[String] {
        &self.entity_ids
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Joined string form, for logs
    pub fn canonical(&self) -> String {
        format!("{}_{}", self.entity_ids.join(","), self.owner_id)
    }
}

/// Cached single lookup; `value: None` records "nothing scheduled"
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: Option<T>,
    cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct BatchCacheEntry<K, T> {
    values: HashMap<K, T>,
    cached_at: DateTime<Utc>,
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub current_entries: usize,
    pub next_entries: usize,
    pub batch_entries: usize,
}

#[derive(Debug, Clone, Copy)]
enum Lookup {
    Current,
    Next,
}

/// Concurrent TTL cache for schedule lookups
///
/// Construct one per process at the composition root and share it by `Arc`.
pub struct ScheduleCache {
    source: Arc<dyn ScheduleSource>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    current: DashMap<EntryKey, CacheEntry<ScheduleItem>>,
    next: DashMap<EntryKey, CacheEntry<ScheduleItem>>,
    batch_current: DashMap<BatchKey, BatchCacheEntry<String, ScheduleItem>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ScheduleCache {
    pub fn new(source: Arc<dyn ScheduleSource>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            source,
            clock,
            config,
            current: DashMap::new(),
            next: DashMap::new(),
            batch_current: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    fn is_expired(&self, cached_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        u128::from(elapsed_ms(cached_at, now)) > self.config.ttl.as_millis()
    }

    fn table(&self, lookup: Lookup) -> &DashMap<EntryKey, CacheEntry<ScheduleItem>> {
        match lookup {
            Lookup::Current => &self.current,
            Lookup::Next => &self.next,
        }
    }

    /// Programme on air for `entity_id`, cached for the TTL
    pub async fn get_current(&self, entity_id: &str, owner_id: &str) -> Option<ScheduleItem> {
        self.lookup(Lookup::Current, entity_id, owner_id).await
    }

    /// Programme after the current one for `entity_id`, cached for the TTL
    pub async fn get_next(&self, entity_id: &str, owner_id: &str) -> Option<ScheduleItem> {
        self.lookup(Lookup::Next, entity_id, owner_id).await
    }

    /// Current and next programme, looked up concurrently
    pub async fn get_current_and_next(
        &self,
        entity_id: &str,
        owner_id: &str,
    ) -> (Option<ScheduleItem>, Option<ScheduleItem>) {
        tokio::join!(
            self.get_current(entity_id, owner_id),
            self.get_next(entity_id, owner_id)
        )
    }

    async fn lookup(&self, lookup: Lookup, entity_id: &str, owner_id: &str) -> Option<ScheduleItem> {
        let key = EntryKey::new(entity_id, owner_id);
        let table = self.table(lookup);
        let now = self.clock.now();

        if let Some(entry) = table.get(&key) {
            if !self.is_expired(entry.cached_at, now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(?lookup, entity_id, owner_id, "Schedule cache hit");
                return entry.value.clone();
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(?lookup, entity_id, owner_id, "Schedule cache miss");

        let fetched = match lookup {
            Lookup::Current => self.source.fetch_current(entity_id, owner_id, now).await,
            Lookup::Next => self.source.fetch_next(entity_id, owner_id, now).await,
        };

        match fetched {
            Ok(value) => {
                table.insert(
                    key,
                    CacheEntry {
                        value: value.clone(),
                        cached_at: now,
                    },
                );
                self.enforce_size();
                value
            }
            Err(e) => {
                warn!(?lookup, entity_id, owner_id, error = %e, "Schedule lookup failed; not cached");
                None
            }
        }
    }

    /// On-air programmes for a set of entities, cached per (set, owner)
    ///
    /// One batched source query on a miss. An empty request returns an empty
    /// map without touching the source.
    pub async fn get_current_batch(
        &self,
        entity_ids: &[String],
        owner_id: &str,
    ) -> HashMap<String, ScheduleItem> {
        if entity_ids.is_empty() {
            return HashMap::new();
        }

        let key = BatchKey::new(entity_ids, owner_id);
        let now = self.clock.now();

        if let Some(entry) = self.batch_current.get(&key) {
            if !self.is_expired(entry.cached_at, now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key.canonical(), "Schedule batch cache hit");
                return entry.values.clone();
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key.canonical(), "Schedule batch cache miss");

        match self
            .source
            .fetch_current_batch(key.entity_ids(), owner_id, now)
            .await
        {
            Ok(values) => {
                self.batch_current.insert(
                    key,
                    BatchCacheEntry {
                        values: values.clone(),
                        cached_at: now,
                    },
                );
                self.enforce_size();
                values
            }
            Err(e) => {
                warn!(key = %key.canonical(), error = %e, "Schedule batch lookup failed; not cached");
                HashMap::new()
            }
        }
    }

    /// Drop the current/next entries for one entity and every batch entry of its owner
    ///
    /// Batch entries are owner-scoped: membership is not tracked, so any
    /// batch of this owner may contain the entity.
    pub fn invalidate(&self, entity_id: &str, owner_id: &str) {
        let key = EntryKey::new(entity_id, owner_id);
        self.current.remove(&key);
        self.next.remove(&key);
        let batches = retain_counting(&self.batch_current, |k, _| k.owner_id != owner_id);
        debug!(entity_id, owner_id, batches, "Invalidated schedule entries");
    }

    /// Drop every entry belonging to `owner_id` in all three tables
    pub fn invalidate_owner(&self, owner_id: &str) {
        let removed = retain_counting(&self.current, |k, _| k.owner_id != owner_id)
            + retain_counting(&self.next, |k, _| k.owner_id != owner_id)
            + retain_counting(&self.batch_current, |k, _| k.owner_id != owner_id);
        debug!(owner_id, removed, "Invalidated schedule entries for owner");
    }

    pub fn clear_all(&self) {
        self.current.clear();
        self.next.clear();
        self.batch_current.clear();
        debug!("Schedule cache cleared");
    }

    /// Remove every entry older than the TTL; returns how many were removed
    ///
    /// Tables are swept shard by shard, never under one global lock.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        retain_counting(&self.current, |_, e| !self.is_expired(e.cached_at, now))
            + retain_counting(&self.next, |_, e| !self.is_expired(e.cached_at, now))
            + retain_counting(&self.batch_current, |_, e| !self.is_expired(e.cached_at, now))
    }

    fn enforce_size(&self) {
        let total = self.len();
        if total > self.config.max_entries {
            let removed = self.evict_expired();
            debug!(
                total,
                removed,
                max_entries = self.config.max_entries,
                "Schedule cache over size; swept expired entries"
            );
        }
    }

    /// Total entries across all tables
    pub fn len(&self) -> usize {
        self.current.len() + self.next.len() + self.batch_current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            current_entries: self.current.len(),
            next_entries: self.next.len(),
            batch_entries: self.batch_current.len(),
        }
    }
}

/// `DashMap::retain` that reports how many entries it removed
fn retain_counting<K, V>(map: &DashMap<K, V>, mut keep: impl FnMut(&K, &V) -> bool) -> usize
where
    K: Eq + Hash,
{
    let mut removed = 0;
    map.retain(|k, v| {
        let kept = keep(k, v);
        if !kept {
            removed += 1;
        }
        kept
    });
    removed
}
