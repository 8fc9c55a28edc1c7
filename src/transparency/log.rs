//! Collection transparency log.
//!
//! Tracks what the monitor has collected and how each prediction was
//! produced, without storing any app identifiers or raw events.

use crate::collector::types::EventTally;
use crate::core::estimator::EstimatorMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Counters for the current monitoring session.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Screen on/off events processed
    screen_events: AtomicU64,
    /// Unlock events processed
    unlock_events: AtomicU64,
    /// Foreground/background events processed
    app_events: AtomicU64,
    /// Scroll events processed
    scroll_events: AtomicU64,
    /// Samples appended to the window
    samples_collected: AtomicU64,
    /// Predictions produced by the model collaborator
    model_predictions: AtomicU64,
    /// Predictions produced by the heuristic scorer
    heuristic_predictions: AtomicU64,
    /// Records that could not be persisted
    store_failures: AtomicU64,
    session_id: Uuid,
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            screen_events: AtomicU64::new(0),
            unlock_events: AtomicU64::new(0),
            app_events: AtomicU64::new(0),
            scroll_events: AtomicU64::new(0),
            samples_collected: AtomicU64::new(0),
            model_predictions: AtomicU64::new(0),
            heuristic_predictions: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            session_id: Uuid::new_v4(),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that loads and saves cumulative counters at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!(error = %e, "could not load previous collection stats");
        }

        log
    }

    pub fn record_events(&self, tally: &EventTally) {
        self.screen_events.fetch_add(tally.screen, Ordering::Relaxed);
        self.unlock_events.fetch_add(tally.unlock, Ordering::Relaxed);
        self.app_events.fetch_add(tally.app, Ordering::Relaxed);
        self.scroll_events.fetch_add(tally.scroll, Ordering::Relaxed);
    }

    pub fn record_sample(&self) {
        self.samples_collected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prediction(&self, source: EstimatorMode) {
        let counter = match source {
            EstimatorMode::Model => &self.model_predictions,
            EstimatorMode::Heuristic => &self.heuristic_predictions,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            screen_events: self.screen_events.load(Ordering::Relaxed),
            unlock_events: self.unlock_events.load(Ordering::Relaxed),
            app_events: self.app_events.load(Ordering::Relaxed),
            scroll_events: self.scroll_events.load(Ordering::Relaxed),
            samples_collected: self.samples_collected.load(Ordering::Relaxed),
            model_predictions: self.model_predictions.load(Ordering::Relaxed),
            heuristic_predictions: self.heuristic_predictions.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            session_id: self.session_id,
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics ({}):\n\
             - Screen events: {}\n\
             - Unlock events: {}\n\
             - App events: {}\n\
             - Scroll events: {}\n\
             - Samples collected: {}\n\
             - Predictions (model / heuristic): {} / {}\n\
             - Store failures: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Privacy Guarantee:\n\
             - No screen content captured\n\
             - App identifiers never leave the device\n\
             - Only counts, durations and scroll distance retained",
            stats.session_id,
            stats.screen_events,
            stats.unlock_events,
            stats.app_events,
            stats.scroll_events,
            stats.samples_collected,
            stats.model_predictions,
            stats.heuristic_predictions,
            stats.store_failures,
            stats.session_duration_secs
        )
    }

    /// Save cumulative counters to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                screen_events: stats.screen_events,
                unlock_events: stats.unlock_events,
                app_events: stats.app_events,
                scroll_events: stats.scroll_events,
                samples_collected: stats.samples_collected,
                model_predictions: stats.model_predictions,
                heuristic_predictions: stats.heuristic_predictions,
                store_failures: stats.store_failures,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.screen_events
                    .store(persisted.screen_events, Ordering::Relaxed);
                self.unlock_events
                    .store(persisted.unlock_events, Ordering::Relaxed);
                self.app_events.store(persisted.app_events, Ordering::Relaxed);
                self.scroll_events
                    .store(persisted.scroll_events, Ordering::Relaxed);
                self.samples_collected
                    .store(persisted.samples_collected, Ordering::Relaxed);
                self.model_predictions
                    .store(persisted.model_predictions, Ordering::Relaxed);
                self.heuristic_predictions
                    .store(persisted.heuristic_predictions, Ordering::Relaxed);
                self.store_failures
                    .store(persisted.store_failures, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.screen_events,
            &self.unlock_events,
            &self.app_events,
            &self.scroll_events,
            &self.samples_collected,
            &self.model_predictions,
            &self.heuristic_predictions,
            &self.store_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub screen_events: u64,
    pub unlock_events: u64,
    pub app_events: u64,
    pub scroll_events: u64,
    pub samples_collected: u64,
    pub model_predictions: u64,
    pub heuristic_predictions: u64,
    pub store_failures: u64,
    pub session_id: Uuid,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    screen_events: u64,
    unlock_events: u64,
    app_events: u64,
    scroll_events: u64,
    samples_collected: u64,
    model_predictions: u64,
    heuristic_predictions: u64,
    store_failures: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
