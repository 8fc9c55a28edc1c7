//! Prediction records handed to the persistence collaborator.
//!
//! One record is produced per prediction tick. It carries the serialized
//! feature vector next to the score so UI observers can show both.

use crate::core::aggregator::{progress_percent, AggregatedFeatures};
use crate::core::estimator::{EstimatorMode, PredictionResult, RiskLabel};
use crate::core::features::FeatureVector;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Persisted outcome of one prediction tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// JSON-serialized [`FeatureVector`]
    pub feature_vector: String,
    /// Probability of the at-risk class, in [0, 1]
    pub probability: f64,
    pub label: RiskLabel,
    /// Path that produced the score
    pub source: EstimatorMode,
    /// `100 * samples / capacity`
    pub collection_progress_percent: u8,
    pub timestamp_millis: i64,
}

impl PredictionRecord {
    pub fn new(
        features: &FeatureVector,
        aggregated: &AggregatedFeatures,
        result: &PredictionResult,
        at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            feature_vector: features.to_json()?,
            probability: result.probability,
            label: result.label,
            source: result.source,
            collection_progress_percent: progress_percent(
                aggregated.sample_count,
                aggregated.capacity,
            ),
            timestamp_millis: at.timestamp_millis(),
        })
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_millis).single()
    }

    /// Probability as a 0-100 score.
    pub fn score_percent(&self) -> u8 {
        (self.probability.clamp(0.0, 1.0) * 100.0).round() as u8
    }

    /// Whether the score reaches the user's alert threshold (0-100).
    pub fn exceeds(&self, threshold: u8) -> bool {
        self.score_percent() >= threshold
    }

    /// Decode the stored feature vector.
    pub fn features(&self) -> Result<FeatureVector, serde_json::Error> {
        serde_json::from_str(&self.feature_vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::{FeatureVectorBuilder, TimeOfDay};
    use chrono_tz::Tz;

    fn record(probability: f64) -> PredictionRecord {
        let mut aggregated = AggregatedFeatures::empty(60, TimeOfDay::new(10, 0));
        aggregated.sample_count = 6;
        aggregated.usage.unlocks = 10;
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let features = FeatureVectorBuilder::new(4, Some(Tz::UTC)).build(&aggregated, now);
        let result = PredictionResult {
            probability,
            label: RiskLabel::from_probability(probability),
            source: EstimatorMode::Heuristic,
        };
        PredictionRecord::new(&features, &aggregated, &result, now).unwrap()
    }

    #[test]
    fn test_record_fields() {
        let record = record(0.42);
        assert_eq!(record.collection_progress_percent, 10);
        assert_eq!(record.label, RiskLabel::Normal);
        assert_eq!(record.score_percent(), 42);
        assert_eq!(
            record.timestamp(),
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_feature_vector_survives_serialization() {
        let record = record(0.42);
        let features = record.features().unwrap();
        assert_eq!(features.usage.unlocks, 10);
        assert_eq!(features.app_embedding.len(), 4);
    }

    #[test]
    fn test_threshold() {
        let record = record(0.7);
        assert!(record.exceeds(70));
        assert!(record.exceeds(0));
        assert!(!record.exceeds(71));
    }
}
