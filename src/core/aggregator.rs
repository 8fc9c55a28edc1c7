//! Window aggregation and rescaling.
//!
//! A partial window is rescaled to the canonical full-window duration on the
//! assumption that what was observed so far is representative. Output is
//! produced as soon as there is a single sample and gets more accurate as
//! the window fills.

use crate::core::catalog::AppCatalog;
use crate::core::features::{CyclicalTime, TimeOfDay};
use crate::core::window::{Sample, SlidingWindowBuffer};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Default collection tick.
pub const DEFAULT_TICK: Duration = Duration::from_secs(5);

/// Default sample count below which a window is considered sparse.
pub const DEFAULT_MIN_SAMPLES: usize = 6;

/// Extrapolation horizons for the screen-time estimates, in seconds.
const HORIZON_15M_SECS: u64 = 15 * 60;
const HORIZON_30M_SECS: u64 = 30 * 60;
const HORIZON_60M_SECS: u64 = 60 * 60;

/// Floor for the canonical window length, keeps the rates finite.
const MIN_WINDOW_SECS: f64 = 1e-3;

/// What to do with windows holding fewer than `min_samples` samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinSamplePolicy {
    /// Rescale any non-empty window.
    #[default]
    BestEffort,
    /// Aggregate sparse windows as if they were empty.
    Enforce,
}

/// Aggregator settings.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Length of one collection tick
    pub tick: Duration,
    pub min_samples: usize,
    pub policy: MinSamplePolicy,
    /// Zone used for time-of-day fields; `None` uses the system zone
    pub timezone: Option<Tz>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            min_samples: DEFAULT_MIN_SAMPLES,
            policy: MinSamplePolicy::BestEffort,
            timezone: None,
        }
    }
}

/// Scalar usage aggregates, scaled to the canonical window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Screen-on seconds, at most the canonical window length
    pub screen_on_secs: u32,
    pub scroll_pixels: u64,
    pub unlocks: u32,
    pub app_switches: u32,
    /// Distinct apps seen in the window (not scaled)
    pub distinct_apps: u32,
    /// Extrapolated screen time over the last 15 minutes (≤ 900)
    pub screen_last_15m_secs: u32,
    /// Extrapolated screen time over the last 30 minutes (≤ 1800)
    pub screen_last_30m_secs: u32,
    /// Extrapolated screen time over the last 60 minutes (≤ 3600)
    pub screen_last_60m_secs: u32,
    /// Unlocks per minute
    pub unlock_rate: f64,
    /// App switches per minute
    pub app_switch_rate: f64,
    /// Scroll pixels per screen-on second
    pub scroll_rate: f64,
    /// Mean category weight of the window's apps (1.0 when none)
    pub category_weight: f64,
}

/// Result of one aggregation tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedFeatures {
    /// Samples present in the window when it was aggregated
    pub sample_count: usize,
    pub capacity: usize,
    /// `capacity / sample_count`, or 0 for an empty window
    pub scale_factor: f64,
    #[serde(flatten)]
    pub usage: UsageTotals,
    pub time: TimeOfDay,
    pub encoding: CyclicalTime,
    /// Distinct app identifiers seen in the window, sorted
    pub app_ids: Vec<String>,
}

impl AggregatedFeatures {
    /// All-zero counts; the time fields still reflect the wall clock.
    pub fn empty(capacity: usize, time: TimeOfDay) -> Self {
        Self {
            sample_count: 0,
            capacity,
            scale_factor: 0.0,
            usage: UsageTotals {
                category_weight: 1.0,
                ..UsageTotals::default()
            },
            time,
            encoding: time.encode(),
            app_ids: Vec::new(),
        }
    }

    /// `100 * sample_count / capacity`.
    pub fn progress_percent(&self) -> u8 {
        progress_percent(self.sample_count, self.capacity)
    }
}

/// Share of the window that has been filled, 0..=100.
pub fn progress_percent(sample_count: usize, capacity: usize) -> u8 {
    if capacity == 0 {
        return 0;
    }
    let pct = (sample_count.min(capacity) * 100) / capacity;
    u8::try_from(pct).unwrap_or(100)
}

/// Derives [`AggregatedFeatures`] from a [`SlidingWindowBuffer`].
#[derive(Debug, Clone)]
pub struct WindowAggregator {
    config: AggregatorConfig,
    catalog: AppCatalog,
}

impl WindowAggregator {
    pub fn new(config: AggregatorConfig, catalog: AppCatalog) -> Self {
        Self { config, catalog }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Canonical window length for a buffer of `capacity` ticks.
    pub fn canonical_window_secs(&self, capacity: usize) -> f64 {
        (capacity as f64 * self.config.tick.as_secs_f64()).max(MIN_WINDOW_SECS)
    }

    /// Aggregate the buffer at the current wall-clock time.
    pub fn aggregate(&self, buffer: &SlidingWindowBuffer) -> AggregatedFeatures {
        self.aggregate_at(buffer, Utc::now())
    }

    pub fn aggregate_at(&self, buffer: &SlidingWindowBuffer, now: DateTime<Utc>) -> AggregatedFeatures {
        let samples = buffer.snapshot();
        self.aggregate_samples(&samples, buffer.capacity(), now)
    }

    /// Aggregate an ordered window of samples taken from a buffer of `capacity`.
    pub fn aggregate_samples(
        &self,
        samples: &[Sample],
        capacity: usize,
        now: DateTime<Utc>,
    ) -> AggregatedFeatures {
        let time = TimeOfDay::at(now, self.config.timezone);
        let sample_count = samples.len();

        if sample_count == 0 {
            return AggregatedFeatures::empty(capacity, time);
        }

        if sample_count < self.config.min_samples {
            match self.config.policy {
                MinSamplePolicy::Enforce => {
                    tracing::debug!(
                        sample_count,
                        min_samples = self.config.min_samples,
                        "window below minimum sample count, aggregating as empty"
                    );
                    let mut features = AggregatedFeatures::empty(capacity, time);
                    features.sample_count = sample_count;
                    return features;
                }
                MinSamplePolicy::BestEffort => {
                    tracing::debug!(
                        sample_count,
                        min_samples = self.config.min_samples,
                        "rescaling sparse window"
                    );
                }
            }
        }

        let mut screen_sum: u64 = 0;
        let mut scroll_sum: u64 = 0;
        let mut unlock_sum: u64 = 0;
        let mut switch_sum: u64 = 0;
        let mut apps: BTreeSet<&str> = BTreeSet::new();

        for sample in samples {
            screen_sum += u64::from(sample.screen_on_secs);
            scroll_sum = scroll_sum.saturating_add(sample.scroll_pixels);
            unlock_sum += u64::from(sample.unlock_count);
            switch_sum += u64::from(sample.app_switches);
            apps.extend(sample.active_app_ids.iter().map(String::as_str));
        }

        let scale_factor = capacity as f64 / sample_count as f64;
        let canonical_secs = self.canonical_window_secs(capacity);
        let canonical_minutes = canonical_secs / 60.0;

        let screen = scale_count(screen_sum, scale_factor).min(canonical_secs.round() as u64);
        let scroll = scale_count(scroll_sum, scale_factor);
        let unlocks = scale_count(unlock_sum, scale_factor);
        let switches = scale_count(switch_sum, scale_factor);

        let scroll_rate = if screen > 0 {
            scroll as f64 / screen as f64
        } else {
            0.0
        };

        let usage = UsageTotals {
            screen_on_secs: saturate_u32(screen),
            scroll_pixels: scroll,
            unlocks: saturate_u32(unlocks),
            app_switches: saturate_u32(switches),
            distinct_apps: saturate_u32(apps.len() as u64),
            screen_last_15m_secs: extrapolate(screen, canonical_secs, HORIZON_15M_SECS),
            screen_last_30m_secs: extrapolate(screen, canonical_secs, HORIZON_30M_SECS),
            screen_last_60m_secs: extrapolate(screen, canonical_secs, HORIZON_60M_SECS),
            unlock_rate: unlocks as f64 / canonical_minutes,
            app_switch_rate: switches as f64 / canonical_minutes,
            scroll_rate,
            category_weight: self.catalog.category_weight(apps.iter().copied()),
        };

        AggregatedFeatures {
            sample_count,
            capacity,
            scale_factor,
            usage,
            time,
            encoding: time.encode(),
            app_ids: apps.into_iter().map(str::to_owned).collect(),
        }
    }
}

impl Default for WindowAggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default(), AppCatalog::default())
    }
}

/// Scale a summed count, rounding to the nearest integer.
fn scale_count(sum: u64, scale_factor: f64) -> u64 {
    (sum as f64 * scale_factor).round().max(0.0) as u64
}

/// Extrapolate canonical-window screen time to `horizon_secs`, clamped to it.
fn extrapolate(screen_secs: u64, canonical_secs: f64, horizon_secs: u64) -> u32 {
    let ratio = horizon_secs as f64 / canonical_secs;
    let estimate = (screen_secs as f64 * ratio).round() as u64;
    saturate_u32(estimate.min(horizon_secs))
}

fn saturate_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn aggregator(policy: MinSamplePolicy) -> WindowAggregator {
        WindowAggregator::new(
            AggregatorConfig {
                policy,
                timezone: Some(Tz::UTC),
                ..AggregatorConfig::default()
            },
            AppCatalog::default(),
        )
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, h, m, s).unwrap()
    }

    fn sample(screen: u32, scroll: u64, unlocks: u32, apps: &[&str]) -> Sample {
        let mut sample = Sample::idle(at(12, 0, 0));
        sample.screen_on_secs = screen;
        sample.scroll_pixels = scroll;
        sample.unlock_count = unlocks;
        sample.active_app_ids = apps.iter().map(|a| a.to_string()).collect();
        sample
    }

    #[test]
    fn test_empty_window_keeps_time_fields() {
        let buffer = SlidingWindowBuffer::new(60);
        let now = at(18, 15, 0);
        let features = aggregator(MinSamplePolicy::BestEffort).aggregate_at(&buffer, now);

        assert_eq!(features.sample_count, 0);
        assert_eq!(features.usage.screen_on_secs, 0);
        assert_eq!(features.usage.scroll_pixels, 0);
        assert_eq!(features.usage.unlocks, 0);
        assert_eq!(features.time, TimeOfDay::new(18, 15));
        assert!((features.encoding.hour_sin + 1.0).abs() < 1e-12);
        assert!((features.encoding.minute_sin - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_window_tracks_wall_clock() {
        let buffer = SlidingWindowBuffer::new(60);
        let agg = aggregator(MinSamplePolicy::BestEffort);

        let before = Utc::now();
        let features = agg.aggregate(&buffer);
        let after = Utc::now();

        assert_eq!(features.sample_count, 0);
        assert_eq!(features.usage.screen_on_secs, 0);
        assert_eq!(features.usage.scroll_pixels, 0);
        assert_eq!(features.usage.unlocks, 0);
        assert_eq!(features.usage.unlock_rate, 0.0);
        assert!(
            features.time == TimeOfDay::at(before, Some(Tz::UTC))
                || features.time == TimeOfDay::at(after, Some(Tz::UTC))
        );
        assert_eq!(features.encoding, features.time.encode());
    }

    #[test]
    fn test_half_window_doubles_totals() {
        let buffer = SlidingWindowBuffer::new(60);
        for _ in 0..30 {
            buffer.add_sample(sample(3, 77, 1, &[]));
        }
        let features = aggregator(MinSamplePolicy::BestEffort).aggregate_at(&buffer, at(12, 0, 0));

        assert_eq!(features.scale_factor, 2.0);
        assert_eq!(features.usage.screen_on_secs, 2 * 30 * 3);
        assert_eq!(features.usage.scroll_pixels, 2 * 30 * 77);
        assert_eq!(features.usage.unlocks, 2 * 30);
    }

    #[test]
    fn test_clamps_hold_for_pathological_scale() {
        let buffer = SlidingWindowBuffer::new(60);
        buffer.add_sample(sample(5, 10, 0, &[]));
        let features = aggregator(MinSamplePolicy::BestEffort).aggregate_at(&buffer, at(12, 0, 0));

        assert_eq!(features.scale_factor, 60.0);
        assert_eq!(features.usage.screen_on_secs, 300);
        assert!(features.usage.screen_last_15m_secs <= 900);
        assert!(features.usage.screen_last_30m_secs <= 1800);
        assert!(features.usage.screen_last_60m_secs <= 3600);
        assert_eq!(features.usage.screen_last_60m_secs, 3600);
    }

    #[test]
    fn test_extrapolation_multipliers() {
        let buffer = SlidingWindowBuffer::new(60);
        for _ in 0..60 {
            buffer.add_sample(sample(1, 0, 0, &[]));
        }
        let features = aggregator(MinSamplePolicy::BestEffort).aggregate_at(&buffer, at(12, 0, 0));

        assert_eq!(features.usage.screen_on_secs, 60);
        assert_eq!(features.usage.screen_last_15m_secs, 180);
        assert_eq!(features.usage.screen_last_30m_secs, 360);
        assert_eq!(features.usage.screen_last_60m_secs, 720);
    }

    #[test]
    fn test_scroll_rate_guard() {
        let buffer = SlidingWindowBuffer::new(60);
        buffer.add_sample(sample(0, 500, 0, &[]));
        let features = aggregator(MinSamplePolicy::BestEffort).aggregate_at(&buffer, at(12, 0, 0));

        assert_eq!(features.usage.screen_on_secs, 0);
        assert_eq!(features.usage.scroll_rate, 0.0);
    }

    #[test]
    fn test_distinct_apps_and_category_weight() {
        let buffer = SlidingWindowBuffer::new(60);
        buffer.add_sample(sample(5, 0, 0, &["com.instagram.android"]));
        buffer.add_sample(sample(5, 0, 0, &["com.instagram.android", "com.example.other"]));
        let features = aggregator(MinSamplePolicy::BestEffort).aggregate_at(&buffer, at(12, 0, 0));

        assert_eq!(features.usage.distinct_apps, 2);
        assert_eq!(features.app_ids.len(), 2);
        assert!((features.usage.category_weight - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_enforced_minimum_aggregates_as_empty() {
        let buffer = SlidingWindowBuffer::new(60);
        for _ in 0..5 {
            buffer.add_sample(sample(5, 100, 1, &[]));
        }

        let enforced = aggregator(MinSamplePolicy::Enforce).aggregate_at(&buffer, at(12, 0, 0));
        assert_eq!(enforced.sample_count, 5);
        assert_eq!(enforced.usage.screen_on_secs, 0);
        assert_eq!(enforced.usage.unlocks, 0);

        let best_effort =
            aggregator(MinSamplePolicy::BestEffort).aggregate_at(&buffer, at(12, 0, 0));
        assert_eq!(best_effort.usage.screen_on_secs, 300);

        buffer.add_sample(sample(5, 100, 1, &[]));
        let enforced = aggregator(MinSamplePolicy::Enforce).aggregate_at(&buffer, at(12, 0, 0));
        assert_eq!(enforced.usage.unlocks, 60);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let buffer = SlidingWindowBuffer::new(60);
        for i in 0..17 {
            buffer.add_sample(sample(i % 6, 40 * i as u64, i % 2, &["com.example.feed"]));
        }
        let agg = aggregator(MinSamplePolicy::BestEffort);
        let now = at(7, 30, 12);
        assert_eq!(agg.aggregate_at(&buffer, now), agg.aggregate_at(&buffer, now));
    }

    #[test]
    fn test_sub_second_tick_keeps_window_length() {
        let agg = WindowAggregator::new(
            AggregatorConfig {
                tick: Duration::from_millis(500),
                timezone: Some(Tz::UTC),
                ..AggregatorConfig::default()
            },
            AppCatalog::default(),
        );
        assert_eq!(agg.canonical_window_secs(60), 30.0);

        let buffer = SlidingWindowBuffer::new(60);
        for _ in 0..6 {
            buffer.add_sample(sample(1, 0, 1, &[]));
        }
        let usage = agg.aggregate_at(&buffer, at(12, 0, 0)).usage;
        assert_eq!(usage.screen_on_secs, 30);
        assert_eq!(usage.unlocks, 60);
        assert_eq!(usage.unlock_rate, 120.0);
        assert_eq!(usage.screen_last_15m_secs, 900);
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 60), 0);
        assert_eq!(progress_percent(6, 60), 10);
        assert_eq!(progress_percent(60, 60), 100);
        assert_eq!(progress_percent(90, 60), 100);
        assert_eq!(progress_percent(3, 0), 0);
    }
}
