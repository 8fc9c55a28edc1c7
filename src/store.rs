//! Key-value persistence for prediction records and user settings.
//!
//! The monitor writes each prediction record field under a fixed key, and
//! pushes the record to in-process subscribers. UI observers either poll
//! [`RecordStore::latest`] or hold a [`RecordStore::subscribe`] receiver.

use crate::core::estimator::{EstimatorMode, RiskLabel};
use crate::core::record::PredictionRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

pub const KEY_FEATURE_VECTOR: &str = "model_input_json";
pub const KEY_PROBABILITY: &str = "addiction_probability";
pub const KEY_LABEL: &str = "prediction_label";
pub const KEY_SOURCE: &str = "prediction_source";
pub const KEY_PROGRESS: &str = "collection_progress";
pub const KEY_TIMESTAMP: &str = "last_prediction_ms";
pub const KEY_ALERT_THRESHOLD: &str = "alert_threshold";

/// Record keys, timestamp first: a record without a timestamp reads as absent.
const RECORD_KEYS: [&str; 6] = [
    KEY_TIMESTAMP,
    KEY_FEATURE_VECTOR,
    KEY_PROBABILITY,
    KEY_LABEL,
    KEY_SOURCE,
    KEY_PROGRESS,
];

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Alert threshold {0} is outside 0-100")]
    ThresholdOutOfRange(i64),
}

/// Minimal string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn put(&self, key: &str, value: String) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Write several entries. Implementations may make this a single write.
    fn put_many(&self, entries: Vec<(&str, String)>) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Remove several keys, in order.
    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file.
///
/// The whole map is rewritten on every change, through a temporary file
/// that is renamed over the original.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading existing entries if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<F>(&self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = entries.clone();
        change(&mut next);
        self.write(&next)?;
        *entries = next;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }

    fn put_many(&self, batch: Vec<(&str, String)>) -> Result<(), StoreError> {
        self.update(|entries| {
            for (key, value) in batch {
                entries.insert(key.to_string(), value);
            }
        })
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        self.update(|entries| {
            for key in keys {
                entries.remove(*key);
            }
        })
    }
}

/// User-configured alert threshold, 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct AlertThreshold(u8);

impl AlertThreshold {
    pub const DEFAULT: AlertThreshold = AlertThreshold(50);

    pub fn new(value: i64) -> Result<Self, StoreError> {
        u8::try_from(value)
            .ok()
            .filter(|v| *v <= 100)
            .map(AlertThreshold)
            .ok_or(StoreError::ThresholdOutOfRange(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for AlertThreshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i64> for AlertThreshold {
    type Error = StoreError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AlertThreshold> for i64 {
    fn from(threshold: AlertThreshold) -> Self {
        i64::from(threshold.0)
    }
}

/// Prediction records over a [`KeyValueStore`], with push subscriptions.
pub struct RecordStore {
    store: Arc<dyn KeyValueStore>,
    latest: watch::Sender<Option<PredictionRecord>>,
}

impl RecordStore {
    /// Wrap `store`. Subscribers start from whatever record it already holds.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let initial = read_record(store.as_ref()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring unreadable stored prediction");
            None
        });
        let (latest, _) = watch::channel(initial);
        Self { store, latest }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Push `record` to subscribers and persist it.
    ///
    /// Subscribers are notified even if the write fails.
    pub fn publish(&self, record: PredictionRecord) -> Result<(), StoreError> {
        let entries = vec![
            (KEY_FEATURE_VECTOR, record.feature_vector.clone()),
            (KEY_PROBABILITY, record.probability.to_string()),
            (KEY_LABEL, record.label.as_str().to_string()),
            (KEY_SOURCE, record.source.to_string()),
            (KEY_PROGRESS, record.collection_progress_percent.to_string()),
            (KEY_TIMESTAMP, record.timestamp_millis.to_string()),
        ];
        self.latest.send_replace(Some(record));
        self.store.put_many(entries)
    }

    /// The persisted record, or `None` before the first prediction.
    pub fn latest(&self) -> Result<Option<PredictionRecord>, StoreError> {
        read_record(self.store.as_ref())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PredictionRecord>> {
        self.latest.subscribe()
    }

    /// Remove the stored record.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.latest.send_replace(None);
        self.store.remove_many(&RECORD_KEYS)
    }

    pub fn alert_threshold(&self) -> Result<AlertThreshold, StoreError> {
        match self.store.get(KEY_ALERT_THRESHOLD)? {
            Some(raw) => AlertThreshold::new(parse_field(KEY_ALERT_THRESHOLD, &raw)?),
            None => Ok(AlertThreshold::default()),
        }
    }

    pub fn set_alert_threshold(&self, threshold: AlertThreshold) -> Result<(), StoreError> {
        self.store
            .put(KEY_ALERT_THRESHOLD, threshold.value().to_string())
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("subscribers", &self.latest.receiver_count())
            .finish()
    }
}

fn read_record(store: &dyn KeyValueStore) -> Result<Option<PredictionRecord>, StoreError> {
    let Some(timestamp) = store.get(KEY_TIMESTAMP)? else {
        return Ok(None);
    };

    let required = |key: &str| -> Result<String, StoreError> {
        store.get(key)?.ok_or_else(|| StoreError::InvalidValue {
            key: key.to_string(),
            reason: "missing".to_string(),
        })
    };

    Ok(Some(PredictionRecord {
        feature_vector: required(KEY_FEATURE_VECTOR)?,
        probability: parse_field(KEY_PROBABILITY, &required(KEY_PROBABILITY)?)?,
        label: parse_field::<RiskLabel>(KEY_LABEL, &required(KEY_LABEL)?)?,
        source: parse_field::<EstimatorMode>(KEY_SOURCE, &required(KEY_SOURCE)?)?,
        collection_progress_percent: parse_field(KEY_PROGRESS, &required(KEY_PROGRESS)?)?,
        timestamp_millis: parse_field(KEY_TIMESTAMP, &timestamp)?,
    }))
}

fn parse_field<T>(key: &str, raw: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| StoreError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
