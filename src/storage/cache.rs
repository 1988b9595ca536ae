//! Durable key/value cache holding the last lookup result
//!
//! Values live in memory and are mirrored to a JSON file on every `set`.
//! Subscribers receive one [`CacheChange`] per `set` that changed anything.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

use crate::location::{ErrorState, LocationRecord};

pub const KEY_IP_INFO: &str = "ipInfo";
pub const KEY_LAST_UPDATE: &str = "lastUpdate";
pub const KEY_ERROR_STATE: &str = "errorState";
pub const KEY_REFRESH_CYCLE: &str = "refreshCycle";

const CHANGE_CHANNEL_CAPACITY: usize = 16;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cache serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Old and new value of one key. `None` means the key is absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueChange {
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheChange {
    pub changes: BTreeMap<String, ValueChange>,
}

impl CacheChange {
    pub fn get(&self, key: &str) -> Option<&ValueChange> {
        self.changes.get(key)
    }

    /// New location, when this change replaced it with a present record
    pub fn new_location(&self) -> Option<LocationRecord> {
        self.get(KEY_IP_INFO)?
            .new_value
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn new_last_update(&self) -> Option<DateTime<Utc>> {
        self.get(KEY_LAST_UPDATE)?
            .new_value
            .as_ref()
            .and_then(timestamp_from_value)
    }

    pub fn new_error_state(&self) -> Option<ErrorState> {
        self.get(KEY_ERROR_STATE)?
            .new_value
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

/// Everything one refresh cycle writes. Always stored as a unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
    pub location: Option<LocationRecord>,
    pub last_update: Option<DateTime<Utc>>,
    pub error_state: Option<ErrorState>,
}

impl CacheEntry {
    pub fn success(location: LocationRecord, at: DateTime<Utc>) -> Self {
        Self {
            location: Some(location),
            last_update: Some(at),
            error_state: None,
        }
    }

    pub fn failure(error_state: ErrorState, at: DateTime<Utc>) -> Self {
        Self {
            location: None,
            last_update: Some(at),
            error_state: Some(error_state),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// A newer cycle already wrote; nothing changed
    Superseded { stored_cycle: u64 },
}

struct CacheInner {
    path: Option<PathBuf>,
    values: RwLock<BTreeMap<String, Value>>,
    changes: broadcast::Sender<CacheChange>,
}

/// Shared handle; clones see the same store
#[derive(Clone)]
pub struct LocationCache {
    inner: Arc<CacheInner>,
}

impl LocationCache {
    /// Store without a backing file
    pub fn in_memory() -> Self {
        Self::with_values(None, BTreeMap::new())
    }

    /// Open the store at `path`, loading whatever a previous run left there.
    /// An unreadable or malformed file starts the store empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let values = read_values(&path).await?;

        tracing::debug!("Opened cache at {} ({} keys)", path.display(), values.len());
        Ok(Self::with_values(Some(path), values))
    }

    fn with_values(path: Option<PathBuf>, values: BTreeMap<String, Value>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(CacheInner {
                path,
                values: RwLock::new(values),
                changes,
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.inner.changes.subscribe()
    }

    /// Values for the requested keys that are present
    pub async fn get(&self, keys: &[&str]) -> BTreeMap<String, Value> {
        let values = self.inner.values.read().await;
        keys.iter()
            .filter_map(|key| values.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect()
    }

    /// Write all `updates` at once. A `null` value removes the key.
    pub async fn set(&self, updates: BTreeMap<String, Value>) -> Result<(), CacheError> {
        let mut values = self.inner.values.write().await;
        self.apply(&mut values, updates).await
    }

    async fn apply(
        &self,
        values: &mut BTreeMap<String, Value>,
        updates: BTreeMap<String, Value>,
    ) -> Result<(), CacheError> {
        let mut next = values.clone();
        let mut change = CacheChange::default();

        for (key, value) in updates {
            let new_value = (!value.is_null()).then_some(value);
            let old_value = match &new_value {
                Some(value) => next.insert(key.clone(), value.clone()),
                None => next.remove(&key),
            };
            if old_value != new_value {
                change
                    .changes
                    .insert(key, ValueChange { old_value, new_value });
            }
        }

        if change.changes.is_empty() {
            return Ok(());
        }

        if let Some(path) = &self.inner.path {
            persist(path, &next).await?;
        }
        *values = next;

        // No subscribers is fine
        let _ = self.inner.changes.send(change);
        Ok(())
    }

    pub async fn read_entry(&self) -> CacheEntry {
        let values = self.get(&[KEY_IP_INFO, KEY_LAST_UPDATE, KEY_ERROR_STATE]).await;

        let location = values.get(KEY_IP_INFO).and_then(|value| {
            serde_json::from_value::<LocationRecord>(value.clone())
                .map_err(|err| tracing::warn!("Ignoring unreadable cached location: {}", err))
                .ok()
        });
        let error_state = values
            .get(KEY_ERROR_STATE)
            .and_then(|value| serde_json::from_value::<ErrorState>(value.clone()).ok());

        CacheEntry {
            location,
            last_update: values.get(KEY_LAST_UPDATE).and_then(timestamp_from_value),
            error_state,
        }
    }

    pub async fn last_update(&self) -> Option<DateTime<Utc>> {
        self.get(&[KEY_LAST_UPDATE])
            .await
            .get(KEY_LAST_UPDATE)
            .and_then(timestamp_from_value)
    }

    /// Id of the refresh cycle behind the stored entry, 0 if none
    pub async fn stored_cycle(&self) -> u64 {
        cycle_of(&*self.inner.values.read().await)
    }

    /// Adopt the file contents when another process sharing the file stored
    /// a later cycle since this store last wrote it.
    async fn sync_from_disk(
        &self,
        values: &mut BTreeMap<String, Value>,
    ) -> Result<(), CacheError> {
        let Some(path) = &self.inner.path else {
            return Ok(());
        };
        let on_disk = read_values(path).await?;
        let disk_cycle = cycle_of(&on_disk);
        if disk_cycle <= cycle_of(values) {
            return Ok(());
        }

        tracing::debug!("Cache file holds newer cycle {}, reloading", disk_cycle);
        let mut updates: BTreeMap<String, Value> = values
            .keys()
            .filter(|key| !on_disk.contains_key(*key))
            .map(|key| (key.clone(), Value::Null))
            .collect();
        updates.extend(on_disk);
        self.apply(values, updates).await
    }

    /// Replace the whole entry on behalf of refresh cycle `cycle`.
    ///
    /// Rejected when the stored entry, in memory or in the file, came from a
    /// later cycle.
    pub async fn write_entry(
        &self,
        entry: &CacheEntry,
        cycle: u64,
    ) -> Result<WriteOutcome, CacheError> {
        let mut values = self.inner.values.write().await;
        self.sync_from_disk(&mut values).await?;

        let stored_cycle = cycle_of(&values);
        if stored_cycle > cycle {
            return Ok(WriteOutcome::Superseded { stored_cycle });
        }

        let location = match &entry.location {
            Some(location) => serde_json::to_value(location)?,
            None => Value::Null,
        };
        let error_state = match entry.error_state {
            Some(state) => serde_json::to_value(state)?,
            None => Value::Null,
        };
        let last_update = entry
            .last_update
            .map(|at| Value::from(at.timestamp_millis()))
            .unwrap_or(Value::Null);

        let updates = BTreeMap::from([
            (KEY_IP_INFO.to_string(), location),
            (KEY_LAST_UPDATE.to_string(), last_update),
            (KEY_ERROR_STATE.to_string(), error_state),
            (KEY_REFRESH_CYCLE.to_string(), Value::from(cycle)),
        ]);

        self.apply(&mut values, updates).await?;
        Ok(WriteOutcome::Written)
    }
}

fn cycle_of(values: &BTreeMap<String, Value>) -> u64 {
    values
        .get(KEY_REFRESH_CYCLE)
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// Contents of the cache file; missing or malformed reads as empty
async fn read_values(path: &Path) -> Result<BTreeMap<String, Value>, CacheError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str::<Map<String, Value>>(&contents) {
            Ok(map) => Ok(map.into_iter().collect()),
            Err(err) => {
                tracing::warn!("Ignoring malformed cache file {}: {}", path.display(), err);
                Ok(BTreeMap::new())
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(err.into()),
    }
}

fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    value.as_i64().and_then(DateTime::from_timestamp_millis)
}

async fn persist(path: &Path, values: &BTreeMap<String, Value>) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_string_pretty(values)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, payload).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
