//! Normalized usage events consumed by the tracker.
//!
//! These are the only signals the aggregation core sees: screen transitions,
//! unlocks, foreground changes and scroll deltas. They carry opaque app
//! identifiers and magnitudes, never content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of a usage event.
///
/// Serialized with a `kind` tag so events can be read as JSON lines, e.g.
/// `{"kind":"app_foreground","app_id":"com.example.feed"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UsageEventKind {
    /// Display turned on
    ScreenOn,
    /// Display turned off
    ScreenOff,
    /// Device unlocked by the user
    Unlock,
    /// An app moved to the foreground
    AppForeground { app_id: String },
    /// An app left the foreground
    AppBackground { app_id: String },
    /// Scroll distance accrued since the previous scroll event
    Scroll { pixels: u64 },
}

impl UsageEventKind {
    /// Short label used in logs and transparency counters.
    pub fn label(&self) -> &'static str {
        match self {
            UsageEventKind::ScreenOn => "screen_on",
            UsageEventKind::ScreenOff => "screen_off",
            UsageEventKind::Unlock => "unlock",
            UsageEventKind::AppForeground { .. } => "app_foreground",
            UsageEventKind::AppBackground { .. } => "app_background",
            UsageEventKind::Scroll { .. } => "scroll",
        }
    }
}

/// A timestamped usage event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// When the event occurred. Defaults to the time it was parsed.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: UsageEventKind,
}

impl UsageEvent {
    /// Create an event stamped with the current time.
    pub fn now(kind: UsageEventKind) -> Self {
        Self::at(Utc::now(), kind)
    }

    /// Create an event with an explicit timestamp.
    pub fn at(timestamp: DateTime<Utc>, kind: UsageEventKind) -> Self {
        Self { timestamp, kind }
    }

    pub fn screen_on() -> Self {
        Self::now(UsageEventKind::ScreenOn)
    }

    pub fn screen_off() -> Self {
        Self::now(UsageEventKind::ScreenOff)
    }

    pub fn unlock() -> Self {
        Self::now(UsageEventKind::Unlock)
    }

    pub fn app_foreground(app_id: impl Into<String>) -> Self {
        Self::now(UsageEventKind::AppForeground {
            app_id: app_id.into(),
        })
    }

    pub fn app_background(app_id: impl Into<String>) -> Self {
        Self::now(UsageEventKind::AppBackground {
            app_id: app_id.into(),
        })
    }

    pub fn scroll(pixels: u64) -> Self {
        Self::now(UsageEventKind::Scroll { pixels })
    }
}

/// Per-kind event counts observed since the last time they were taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTally {
    pub screen: u64,
    pub unlock: u64,
    pub app: u64,
    pub scroll: u64,
}

impl EventTally {
    pub fn record(&mut self, kind: &UsageEventKind) {
        match kind {
            UsageEventKind::ScreenOn | UsageEventKind::ScreenOff => self.screen += 1,
            UsageEventKind::Unlock => self.unlock += 1,
            UsageEventKind::AppForeground { .. } | UsageEventKind::AppBackground { .. } => {
                self.app += 1
            }
            UsageEventKind::Scroll { .. } => self.scroll += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.screen + self.unlock + self.app + self.scroll
    }
}
