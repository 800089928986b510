//! Local derivative storage and its eviction policy.
//!
//! - [`DiskCacheStore`]: key → bytes on the local filesystem, atomic writes
//! - [`CacheIndex`]: metadata view the janitor works against
//! - [`CacheJanitor`]: age and size eviction, run on a timer

mod disk;
mod janitor;

pub use disk::{CacheIndex, DiskCacheStore, EntryMeta, EntryScan, ORPHAN_TMP_AGE, TMP_DIR_NAME};
pub use janitor::{
    CacheJanitor, JanitorConfig, JanitorHandle, SweepReport, DEFAULT_CACHE_DURATION,
    DEFAULT_MAX_CACHE_SIZE, DEFAULT_MAX_DELETIONS, DEFAULT_MAX_SCAN_ENTRIES,
    DEFAULT_SWEEP_INTERVAL, DEFAULT_TIME_BUDGET,
};
