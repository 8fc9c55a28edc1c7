//! Folds the normalized event stream into one [`Sample`] per collection tick.
//!
//! Producers push [`UsageEvent`]s into a bounded channel; the collection task
//! calls [`EventTracker::take_sample`] once per tick, which drains the queue,
//! closes the tick and resets the per-tick counters.

use crate::collector::types::{EventTally, UsageEvent, UsageEventKind};
use crate::collector::CollectorError;
use crate::core::window::Sample;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on queued, not yet folded events.
pub const DEFAULT_EVENT_QUEUE: usize = 10_000;

/// Cumulative scroll distance, readable on demand.
///
/// The total never decreases; samples carry the difference between two reads.
#[derive(Debug, Clone, Default)]
pub struct ScrollCounter(Arc<AtomicU64>);

impl ScrollCounter {
    pub fn add(&self, pixels: u64) {
        self.0.fetch_add(pixels, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Tracks screen, unlock, app and scroll state between collection ticks.
pub struct EventTracker {
    sender: Sender<UsageEvent>,
    receiver: Receiver<UsageEvent>,
    scroll: ScrollCounter,
    last_scroll_total: u64,
    /// Start of the tick currently being filled
    tick_start: Option<DateTime<Utc>>,
    /// When screen-on time started counting for the current tick
    screen_on_since: Option<DateTime<Utc>>,
    screen_on_ms: i64,
    unlocks: u32,
    app_switches: u32,
    /// App currently in the foreground, if any
    foreground: Option<String>,
    /// Last app that was in the foreground, kept across background transitions
    last_foreground: Option<String>,
    running_apps: BTreeSet<String>,
    tally: EventTally,
}

impl EventTracker {
    /// Create a tracker with the default queue bound.
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_EVENT_QUEUE)
    }

    pub fn with_queue_capacity(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            scroll: ScrollCounter::default(),
            last_scroll_total: 0,
            tick_start: None,
            screen_on_since: None,
            screen_on_ms: 0,
            unlocks: 0,
            app_switches: 0,
            foreground: None,
            last_foreground: None,
            running_apps: BTreeSet::new(),
            tally: EventTally::default(),
        }
    }

    /// Sender half for event producers.
    pub fn sender(&self) -> Sender<UsageEvent> {
        self.sender.clone()
    }

    /// Handle on the scroll counter, for producers that accrue scroll directly.
    pub fn scroll_counter(&self) -> ScrollCounter {
        self.scroll.clone()
    }

    /// Queue an event without blocking.
    pub fn submit(&self, event: UsageEvent) -> Result<(), CollectorError> {
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => CollectorError::QueueFull,
            TrySendError::Disconnected(_) => CollectorError::Disconnected,
        })
    }

    pub fn is_screen_on(&self) -> bool {
        self.screen_on_since.is_some()
    }

    pub fn foreground_app(&self) -> Option<&str> {
        self.foreground.as_deref()
    }

    /// Take and reset the per-kind event counts.
    pub fn take_tally(&mut self) -> EventTally {
        std::mem::take(&mut self.tally)
    }

    /// Close the current tick and produce its sample.
    pub fn take_sample(&mut self, tick: Duration) -> Sample {
        self.take_sample_at(Utc::now(), tick)
    }

    /// Close the current tick at `now`.
    pub fn take_sample_at(&mut self, now: DateTime<Utc>, tick: Duration) -> Sample {
        self.drain();

        // Screen still on: count up to now and carry into the next tick.
        if let Some(since) = self.screen_on_since {
            self.screen_on_ms += (now - since).num_milliseconds().max(0);
            self.screen_on_since = Some(now);
        }

        let tick_ms = i64::try_from(tick.as_millis()).unwrap_or(i64::MAX);
        let tick_secs = u32::try_from(tick.as_secs()).unwrap_or(u32::MAX);
        let on_ms = self.screen_on_ms.clamp(0, tick_ms);
        let screen_on_secs = u32::try_from((on_ms + 500) / 1000)
            .unwrap_or(u32::MAX)
            .min(tick_secs);

        let scroll_total = self.scroll.total();
        let scroll_pixels = scroll_total.saturating_sub(self.last_scroll_total);
        self.last_scroll_total = scroll_total;

        let mut active_app_ids = std::mem::take(&mut self.running_apps);
        if let Some(app) = &self.foreground {
            active_app_ids.insert(app.clone());
            self.running_apps.insert(app.clone());
        }

        let sample = Sample {
            timestamp: now,
            screen_on_secs,
            scroll_pixels,
            unlock_count: std::mem::take(&mut self.unlocks),
            app_switches: std::mem::take(&mut self.app_switches),
            active_app_ids,
        };

        self.screen_on_ms = 0;
        self.tick_start = Some(now);
        sample
    }

    /// Fold every queued event into the tick state.
    fn drain(&mut self) {
        while let Ok(event) = self.receiver.try_recv() {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: UsageEvent) {
        self.tally.record(&event.kind);
        let at = event.timestamp;

        match event.kind {
            UsageEventKind::ScreenOn => self.mark_screen_on(at),
            UsageEventKind::ScreenOff => self.mark_screen_off(at),
            UsageEventKind::Unlock => {
                self.unlocks += 1;
                self.mark_screen_on(at);
            }
            UsageEventKind::AppForeground { app_id } => {
                if let Some(previous) = &self.last_foreground {
                    if *previous != app_id {
                        self.app_switches += 1;
                    }
                }
                self.foreground = Some(app_id.clone());
                self.last_foreground = Some(app_id.clone());
                self.running_apps.insert(app_id);
            }
            UsageEventKind::AppBackground { app_id } => {
                if self.foreground.as_deref() == Some(app_id.as_str()) {
                    self.foreground = None;
                }
                self.running_apps.insert(app_id);
            }
            UsageEventKind::Scroll { pixels } => self.scroll.add(pixels),
        }
    }

    fn mark_screen_on(&mut self, at: DateTime<Utc>) {
        if self.screen_on_since.is_some() {
            return;
        }
        // Late events never count time from before the current tick.
        let start = match self.tick_start {
            Some(tick_start) if at < tick_start => tick_start,
            _ => at,
        };
        self.screen_on_since = Some(start);
    }

    fn mark_screen_off(&mut self, at: DateTime<Utc>) {
        if let Some(since) = self.screen_on_since.take() {
            self.screen_on_ms += (at - since).num_milliseconds().max(0);
        }
    }
}

impl Default for EventTracker {
    fn default() -> Self {
        Self::new()
    }
}
