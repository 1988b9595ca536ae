//! Persistent state: the location cache and the headless icon snapshot

pub mod cache;
pub mod icon_snapshot;

pub use cache::{
    CacheChange, CacheEntry, CacheError, LocationCache, ValueChange, WriteOutcome, KEY_ERROR_STATE,
    KEY_IP_INFO, KEY_LAST_UPDATE, KEY_REFRESH_CYCLE,
};
pub use icon_snapshot::{read_icon_snapshot, IconSnapshot, IconSnapshotSurface};
