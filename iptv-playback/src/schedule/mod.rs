//! Schedule ("now/next") lookups and their expiring cache

pub mod cache;
pub mod source;

pub use cache::{BatchKey, CacheConfig, CacheStats, EntryKey, ScheduleCache};
pub use source::{ScheduleItem, ScheduleSource, SourceError};
