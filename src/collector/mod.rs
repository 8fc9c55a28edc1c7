//! Event collection for the usage sentinel.
//!
//! The OS-facing signal sources live outside this crate. They deliver a
//! normalized stream of [`UsageEvent`]s, which the [`EventTracker`] folds
//! into one sample per collection tick.

pub mod reader;
pub mod tracker;
pub mod types;

use thiserror::Error;

// Re-export commonly used types
pub use reader::{forward_json_lines, spawn_json_lines_feed, FeedSummary};
pub use tracker::{EventTracker, ScrollCounter, DEFAULT_EVENT_QUEUE};
pub use types::{EventTally, UsageEvent, UsageEventKind};

/// Errors that can occur while feeding events to the tracker.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Event queue is full")]
    QueueFull,

    #[error("Event tracker is gone")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
