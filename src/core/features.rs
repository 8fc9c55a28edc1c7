//! Feature vector construction.
//!
//! Turns aggregated window totals plus the wall clock into the numeric
//! vector consumed by the score estimator. Time of day is encoded as
//! sine/cosine pairs so 23:59 and 00:00 end up next to each other.

use crate::core::aggregator::{AggregatedFeatures, UsageTotals};
use crate::core::catalog::{AppCatalog, AppCategory};
use chrono::{DateTime, Local, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;

/// Default app-embedding dimensionality.
pub const DEFAULT_EMBEDDING_DIM: usize = 32;

/// Names of the scalar model inputs, in input order.
pub const SCALAR_FEATURES: [&str; 16] = [
    "screen_on_secs",
    "scroll_pixels",
    "unlocks",
    "app_switches",
    "distinct_apps",
    "screen_last_15m_secs",
    "screen_last_30m_secs",
    "screen_last_60m_secs",
    "unlock_rate",
    "app_switch_rate",
    "scroll_rate",
    "category_weight",
    "hour_sin",
    "hour_cos",
    "minute_sin",
    "minute_cos",
];

/// Local hour and minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Self {
        Self {
            hour: hour % 24,
            minute: minute % 60,
        }
    }

    /// Local time of day at `instant`, in `timezone` or the system zone.
    pub fn at(instant: DateTime<Utc>, timezone: Option<Tz>) -> Self {
        match timezone {
            Some(tz) => Self::from_timelike(&instant.with_timezone(&tz)),
            None => Self::from_timelike(&instant.with_timezone(&Local)),
        }
    }

    fn from_timelike<T: Timelike>(t: &T) -> Self {
        Self::new(t.hour(), t.minute())
    }

    /// 22:00 through 05:59.
    pub fn is_night(&self) -> bool {
        self.hour >= 22 || self.hour <= 5
    }

    pub fn encode(&self) -> CyclicalTime {
        let hour_angle = 2.0 * PI * self.hour as f64 / 24.0;
        let minute_angle = 2.0 * PI * self.minute as f64 / 60.0;
        CyclicalTime {
            hour_sin: hour_angle.sin(),
            hour_cos: hour_angle.cos(),
            minute_sin: minute_angle.sin(),
            minute_cos: minute_angle.cos(),
        }
    }
}

/// Sine/cosine encoding of hour-of-day and minute-of-hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CyclicalTime {
    pub hour_sin: f64,
    pub hour_cos: f64,
    pub minute_sin: f64,
    pub minute_cos: f64,
}

/// Supplies an app-embedding vector for the apps seen in a window.
pub trait AppEmbeddingSource: Send + Sync {
    /// Return `None` when there is no signal for these apps.
    fn embed(&self, app_ids: &[String], dim: usize) -> Option<Vec<f32>>;
}

/// Category histogram embedding: the share of window apps in each
/// [`AppCategory`], in the leading slots, zero-padded to `dim`.
#[derive(Debug, Clone, Default)]
pub struct CategoryEmbedding {
    catalog: AppCatalog,
}

impl CategoryEmbedding {
    pub fn new(catalog: AppCatalog) -> Self {
        Self { catalog }
    }
}

impl AppEmbeddingSource for CategoryEmbedding {
    fn embed(&self, app_ids: &[String], dim: usize) -> Option<Vec<f32>> {
        if app_ids.is_empty() || dim < AppCategory::ALL.len() {
            return None;
        }
        let mut vector = vec![0.0f32; dim];
        for app in app_ids {
            vector[self.catalog.classify(app).index()] += 1.0;
        }
        let total = app_ids.len() as f32;
        for slot in vector.iter_mut().take(AppCategory::ALL.len()) {
            *slot /= total;
        }
        Some(vector)
    }
}

/// Final input to the score estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    #[serde(flatten)]
    pub usage: UsageTotals,
    pub time: TimeOfDay,
    pub encoding: CyclicalTime,
    /// App embedding of fixed dimensionality. All zeros means "no signal".
    pub app_embedding: Vec<f32>,
    /// Whether `app_embedding` came from a real source
    pub embedding_present: bool,
}

impl FeatureVector {
    /// Scalar inputs in [`SCALAR_FEATURES`] order.
    pub fn scalar_inputs(&self) -> [f32; SCALAR_FEATURES.len()] {
        let u = &self.usage;
        let e = &self.encoding;
        [
            u.screen_on_secs as f32,
            u.scroll_pixels as f32,
            u.unlocks as f32,
            u.app_switches as f32,
            u.distinct_apps as f32,
            u.screen_last_15m_secs as f32,
            u.screen_last_30m_secs as f32,
            u.screen_last_60m_secs as f32,
            u.unlock_rate as f32,
            u.app_switch_rate as f32,
            u.scroll_rate as f32,
            u.category_weight as f32,
            e.hour_sin as f32,
            e.hour_cos as f32,
            e.minute_sin as f32,
            e.minute_cos as f32,
        ]
    }

    /// Flat model input: scalars followed by the embedding.
    pub fn model_input(&self) -> Vec<f32> {
        let mut input = Vec::with_capacity(self.input_width());
        input.extend_from_slice(&self.scalar_inputs());
        input.extend_from_slice(&self.app_embedding);
        input
    }

    pub fn input_width(&self) -> usize {
        SCALAR_FEATURES.len() + self.app_embedding.len()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Builds [`FeatureVector`]s from aggregated window features.
#[derive(Clone)]
pub struct FeatureVectorBuilder {
    embedding_dim: usize,
    timezone: Option<Tz>,
    embedding: Option<Arc<dyn AppEmbeddingSource>>,
}

impl FeatureVectorBuilder {
    /// A builder with no embedding source (zero embeddings).
    pub fn new(embedding_dim: usize, timezone: Option<Tz>) -> Self {
        Self {
            embedding_dim,
            timezone,
            embedding: None,
        }
    }

    pub fn with_embedding_source(mut self, source: Arc<dyn AppEmbeddingSource>) -> Self {
        self.embedding = Some(source);
        self
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Build the vector for `aggregated` at wall-clock `now`.
    pub fn build(&self, aggregated: &AggregatedFeatures, now: DateTime<Utc>) -> FeatureVector {
        let time = TimeOfDay::at(now, self.timezone);

        let embedded = self
            .embedding
            .as_ref()
            .and_then(|source| source.embed(&aggregated.app_ids, self.embedding_dim))
            .filter(|vector| {
                let fits = vector.len() == self.embedding_dim;
                if !fits {
                    tracing::warn!(
                        expected = self.embedding_dim,
                        actual = vector.len(),
                        "discarding app embedding of wrong dimensionality"
                    );
                }
                fits
            });
        let embedding_present = embedded.is_some();
        let app_embedding = embedded.unwrap_or_else(|| vec![0.0; self.embedding_dim]);

        FeatureVector {
            usage: aggregated.usage.clone(),
            time,
            encoding: time.encode(),
            app_embedding,
            embedding_present,
        }
    }
}

impl Default for FeatureVectorBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM, None)
    }
}

impl std::fmt::Debug for FeatureVectorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureVectorBuilder")
            .field("embedding_dim", &self.embedding_dim)
            .field("timezone", &self.timezone)
            .field("embedding", &self.embedding.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, h, m, 0).unwrap()
    }

    fn aggregated() -> AggregatedFeatures {
        let mut features = AggregatedFeatures::empty(60, TimeOfDay::new(0, 0));
        features.usage.screen_on_secs = 120;
        features.usage.unlock_rate = 1.5;
        features.app_ids = vec!["com.instagram.android".into(), "com.example.notes".into()];
        features
    }

    #[test]
    fn test_cyclical_encoding_wraps() {
        let midnight = TimeOfDay::new(0, 0).encode();
        let late = TimeOfDay::new(23, 59).encode();

        assert!((midnight.hour_sin - 0.0).abs() < 1e-12);
        assert!((midnight.hour_cos - 1.0).abs() < 1e-12);
        // 23:00 sits next to 00:00 on the circle
        assert!((late.hour_cos - midnight.hour_cos).abs() < 0.05);
        assert!(late.minute_cos > 0.99);
    }

    #[test]
    fn test_six_pm_encoding() {
        let encoding = TimeOfDay::new(18, 15).encode();
        assert!((encoding.hour_sin + 1.0).abs() < 1e-12);
        assert!((encoding.minute_sin - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_time_of_day_in_timezone() {
        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        let time = TimeOfDay::at(utc(15, 30), Some(tz));
        assert_eq!(time, TimeOfDay::new(0, 30));
        assert!(time.is_night());
    }

    #[test]
    fn test_night_window() {
        assert!(TimeOfDay::new(22, 0).is_night());
        assert!(TimeOfDay::new(5, 59).is_night());
        assert!(!TimeOfDay::new(6, 0).is_night());
        assert!(!TimeOfDay::new(21, 59).is_night());
    }

    #[test]
    fn test_build_copies_scalars_and_zero_embedding() {
        let builder = FeatureVectorBuilder::new(32, Some(Tz::UTC));
        let source = aggregated();
        let vector = builder.build(&source, utc(9, 45));

        assert_eq!(vector.usage, source.usage);
        assert_eq!(vector.time, TimeOfDay::new(9, 45));
        assert_eq!(vector.app_embedding, vec![0.0; 32]);
        assert!(!vector.embedding_present);
        assert_eq!(vector.model_input().len(), SCALAR_FEATURES.len() + 32);
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = FeatureVectorBuilder::new(32, Some(Tz::UTC));
        let source = aggregated();
        assert_eq!(
            builder.build(&source, utc(22, 10)),
            builder.build(&source, utc(22, 10))
        );
    }

    #[test]
    fn test_category_embedding() {
        let builder = FeatureVectorBuilder::new(8, Some(Tz::UTC))
            .with_embedding_source(Arc::new(CategoryEmbedding::default()));
        let vector = builder.build(&aggregated(), utc(12, 0));

        assert!(vector.embedding_present);
        assert_eq!(vector.app_embedding.len(), 8);
        assert_eq!(vector.app_embedding[AppCategory::Social.index()], 0.5);
        assert_eq!(vector.app_embedding[AppCategory::Productivity.index()], 0.5);
        assert_eq!(vector.app_embedding[7], 0.0);
    }

    #[test]
    fn test_embedding_of_wrong_size_is_discarded() {
        struct Broken;
        impl AppEmbeddingSource for Broken {
            fn embed(&self, _: &[String], _: usize) -> Option<Vec<f32>> {
                Some(vec![1.0; 3])
            }
        }

        let builder =
            FeatureVectorBuilder::new(32, Some(Tz::UTC)).with_embedding_source(Arc::new(Broken));
        let vector = builder.build(&aggregated(), utc(12, 0));
        assert!(!vector.embedding_present);
        assert_eq!(vector.app_embedding, vec![0.0; 32]);
    }
}
