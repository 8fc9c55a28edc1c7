//! Usage Sentinel - on-device phone-usage risk monitor.
//!
//! This library turns a normalized stream of usage events (screen on/off,
//! unlocks, app transitions, scroll distance) into a rolling window of
//! per-tick samples and scores that window as a probability of compulsive
//! usage, either with a model collaborator or a deterministic heuristic.
//!
//! # Privacy Guarantees
//!
//! - **No content**: only counts, durations and scroll distance are kept
//! - **Local only**: app identifiers are used for categories and never leave the device
//! - **Bounded history**: samples older than the window are evicted
//! - **Transparency**: all collection is counted and auditable
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Usage Sentinel                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────────────┐    │
//! │  │   Event     │──▶│  Sliding    │──▶│ Aggregator +         │    │
//! │  │   Tracker   │   │  Window     │   │ Feature Builder      │    │
//! │  └─────────────┘   │ (60 × 5s)   │   └──────────────────────┘    │
//! │         │          └─────────────┘              │                │
//! │         ▼                                       ▼                │
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────────────┐    │
//! │  │Transparency │   │   Record    │◀──│ Score Estimator      │    │
//! │  │    Log      │   │   Store     │   │ (model / heuristic)  │    │
//! │  └─────────────┘   └─────────────┘   └──────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use usage_sentinel::core::{
//!     FeatureVectorBuilder, ScoreEstimator, SlidingWindowBuffer, WindowAggregator,
//! };
//! use usage_sentinel::monitor::{MonitorIntervals, PredictionPipeline, UsageMonitor};
//! use usage_sentinel::{collector::EventTracker, store::RecordStore, transparency};
//!
//! # async fn run() {
//! let pipeline = PredictionPipeline::new(
//!     Arc::new(SlidingWindowBuffer::new(60)),
//!     WindowAggregator::default(),
//!     FeatureVectorBuilder::new(32, None),
//!     ScoreEstimator::heuristic_only(),
//!     Arc::new(RecordStore::in_memory()),
//!     transparency::create_shared_log(),
//! );
//! let mut monitor = UsageMonitor::start(
//!     EventTracker::new(),
//!     pipeline,
//!     MonitorIntervals {
//!         collection: std::time::Duration::from_secs(5),
//!         prediction: std::time::Duration::from_secs(60),
//!     },
//! );
//! monitor.stop().await;
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod init;
pub mod monitor;
pub mod store;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use collector::{CollectorError, EventTracker, UsageEvent, UsageEventKind};
pub use config::{Config, ConfigError};
pub use core::{
    AggregatedFeatures, FeatureVector, FeatureVectorBuilder, PredictionRecord, PredictionResult,
    RiskLabel, Sample, ScoreEstimator, SlidingWindowBuffer, WindowAggregator,
};
pub use init::{InitCoordinator, InitProgress};
pub use monitor::{MonitorIntervals, PredictionPipeline, UsageMonitor};
pub use store::{AlertThreshold, RecordStore, StoreError};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║              USAGE SENTINEL - PRIVACY DECLARATION                ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This agent scores your phone usage habits on this device.       ║
║                                                                  ║
║  ✓ WHAT WE CAPTURE:                                              ║
║    • How long the screen is on                                   ║
║    • How often you unlock and switch apps                        ║
║    • How far you scroll (distance only)                          ║
║    • Which apps are in use (for app categories only)             ║
║                                                                  ║
║  ✗ WHAT WE NEVER CAPTURE:                                        ║
║    • Any screen content                                          ║
║    • What you type or read                                       ║
║    • Where you are                                               ║
║                                                                  ║
║  All data is processed locally. Samples older than the           ║
║  5-minute window are discarded. Only the latest score and        ║
║  its feature summary are stored.                                 ║
║                                                                  ║
║  You can view collection statistics anytime with:                ║
║    usage-sentinel status                                         ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_declaration_contents() {
        assert!(PRIVACY_DECLARATION.contains("PRIVACY"));
        assert!(PRIVACY_DECLARATION.contains("NEVER CAPTURE"));
        assert!(PRIVACY_DECLARATION.contains("screen content"));
    }
}
