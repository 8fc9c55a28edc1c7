//! Risk score estimation.
//!
//! The estimator runs in one of two modes. In `Model` mode features are
//! marshalled into the external model's input shape; in `Heuristic` mode a
//! deterministic weighted score is used instead. Any model failure (load
//! error, inference error, malformed output) degrades the estimator to
//! `Heuristic` for the rest of its lifetime. The caller never sees an error.

use crate::core::features::FeatureVector;
use crate::core::model::{ModelError, ModelHandle, ModelOutput};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// Probability above which a window is labelled at-risk.
pub const AT_RISK_THRESHOLD: f64 = 0.5;

/// Binary classification of a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLabel {
    Normal,
    AtRisk,
}

impl RiskLabel {
    pub fn from_probability(probability: f64) -> Self {
        if probability > AT_RISK_THRESHOLD {
            RiskLabel::AtRisk
        } else {
            RiskLabel::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLabel::Normal => "NORMAL",
            RiskLabel::AtRisk => "AT_RISK",
        }
    }
}

impl std::fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text that names no known label or mode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseVariantError {
    kind: &'static str,
    value: String,
}

impl ParseVariantError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl std::str::FromStr for RiskLabel {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(RiskLabel::Normal),
            "AT_RISK" => Ok(RiskLabel::AtRisk),
            other => Err(ParseVariantError::new("risk label", other)),
        }
    }
}

/// Which path produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorMode {
    Model,
    Heuristic,
}

impl std::fmt::Display for EstimatorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EstimatorMode::Model => f.write_str("model"),
            EstimatorMode::Heuristic => f.write_str("heuristic"),
        }
    }
}

impl std::str::FromStr for EstimatorMode {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "model" => Ok(EstimatorMode::Model),
            "heuristic" => Ok(EstimatorMode::Heuristic),
            other => Err(ParseVariantError::new("prediction source", other)),
        }
    }
}

/// Output of one estimation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Probability of the at-risk class, in [0, 1]
    pub probability: f64,
    pub label: RiskLabel,
    pub source: EstimatorMode,
}

/// Deterministic fallback scorer.
///
/// Weighted sum of minute-scale screen time, unlock/switch/scroll rates and
/// app variety, multiplied by a night factor and the window's category
/// weight, normalized by a fixed ceiling and clamped to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicScorer {
    pub screen_5m_weight: f64,
    pub screen_15m_weight: f64,
    pub screen_30m_weight: f64,
    pub screen_60m_weight: f64,
    pub unlock_rate_weight: f64,
    pub switch_rate_weight: f64,
    pub scroll_rate_weight: f64,
    pub distinct_apps_weight: f64,
    pub night_multiplier: f64,
    pub ceiling: f64,
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self {
            screen_5m_weight: 0.08,
            screen_15m_weight: 0.02,
            screen_30m_weight: 0.01,
            screen_60m_weight: 0.005,
            unlock_rate_weight: 0.15,
            switch_rate_weight: 0.1,
            scroll_rate_weight: 0.002,
            distinct_apps_weight: 0.02,
            night_multiplier: 1.5,
            ceiling: 2.0,
        }
    }
}

impl HeuristicScorer {
    /// Unnormalized score.
    pub fn raw_score(&self, features: &FeatureVector) -> f64 {
        let u = &features.usage;
        let minutes = |secs: u32| secs as f64 / 60.0;

        let usage = minutes(u.screen_on_secs) * self.screen_5m_weight
            + minutes(u.screen_last_15m_secs) * self.screen_15m_weight
            + minutes(u.screen_last_30m_secs) * self.screen_30m_weight
            + minutes(u.screen_last_60m_secs) * self.screen_60m_weight;

        let rates = u.unlock_rate * self.unlock_rate_weight
            + u.app_switch_rate * self.switch_rate_weight
            + u.scroll_rate * self.scroll_rate_weight
            + u.distinct_apps as f64 * self.distinct_apps_weight;

        let night = if features.time.is_night() {
            self.night_multiplier
        } else {
            1.0
        };

        (usage + rates) * night * u.category_weight.max(0.0)
    }

    pub fn probability(&self, features: &FeatureVector) -> f64 {
        let p = self.raw_score(features) / self.ceiling;
        if p.is_finite() {
            p.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn predict(&self, features: &FeatureVector) -> PredictionResult {
        let probability = self.probability(features);
        PredictionResult {
            probability,
            label: RiskLabel::from_probability(probability),
            source: EstimatorMode::Heuristic,
        }
    }
}

/// Produces a [`PredictionResult`] for each feature vector.
#[derive(Debug)]
pub struct ScoreEstimator {
    model: ModelHandle,
    mode: EstimatorMode,
    heuristic: HeuristicScorer,
}

impl ScoreEstimator {
    /// Create an estimator, attempting to load the model once.
    pub fn new(mut model: ModelHandle) -> Self {
        let mode = match model.get() {
            Ok(_) => EstimatorMode::Model,
            Err(e) => {
                tracing::warn!(error = %e, "model unavailable, using heuristic scoring");
                EstimatorMode::Heuristic
            }
        };
        Self {
            model,
            mode,
            heuristic: HeuristicScorer::default(),
        }
    }

    /// An estimator that never consults a model.
    pub fn heuristic_only() -> Self {
        Self {
            model: ModelHandle::none(),
            mode: EstimatorMode::Heuristic,
            heuristic: HeuristicScorer::default(),
        }
    }

    pub fn with_heuristic(mut self, heuristic: HeuristicScorer) -> Self {
        self.heuristic = heuristic;
        self
    }

    pub fn mode(&self) -> EstimatorMode {
        self.mode
    }

    /// Estimate the risk for `features`. Never fails.
    pub fn predict(&mut self, features: &FeatureVector) -> PredictionResult {
        if self.mode == EstimatorMode::Model {
            match self.predict_with_model(features) {
                Ok(result) => return result,
                Err(e) => {
                    tracing::warn!(error = %e, "model prediction failed, switching to heuristic scoring");
                    self.mode = EstimatorMode::Heuristic;
                    self.model.reset();
                }
            }
        }
        self.heuristic.predict(features)
    }

    /// Release the model collaborator. The estimator stays usable in
    /// heuristic mode.
    pub fn release(&mut self) {
        self.model.reset();
        self.mode = EstimatorMode::Heuristic;
    }

    fn predict_with_model(&mut self, features: &FeatureVector) -> Result<PredictionResult, ModelError> {
        let input = features.model_input();
        let model = self.model.get()?;
        if let Some(expected) = model.input_width() {
            if expected != input.len() {
                return Err(ModelError::InputShape {
                    expected,
                    actual: input.len(),
                });
            }
        }
        let output = catch_unwind(AssertUnwindSafe(|| model.predict(&input)))
            .map_err(|payload| ModelError::Inference(panic_message(payload.as_ref())))??;
        parse_output(&output)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("model panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("model panicked: {msg}")
    } else {
        "model panicked".to_string()
    }
}

/// Validate model output and turn it into a result.
fn parse_output(output: &ModelOutput) -> Result<PredictionResult, ModelError> {
    if output.probabilities.len() < 2 {
        return Err(ModelError::MalformedOutput(format!(
            "expected 2 class probabilities, got {}",
            output.probabilities.len()
        )));
    }

    let at_risk = f64::from(output.probabilities[1]);
    if !at_risk.is_finite() || !(0.0..=1.0).contains(&at_risk) {
        return Err(ModelError::MalformedOutput(format!(
            "at-risk probability {at_risk} outside [0, 1]"
        )));
    }

    let label = match output.label {
        None => RiskLabel::from_probability(at_risk),
        Some(0) => RiskLabel::Normal,
        Some(1) => RiskLabel::AtRisk,
        Some(other) => {
            return Err(ModelError::MalformedOutput(format!(
                "unknown class label {other}"
            )))
        }
    };

    Ok(PredictionResult {
        probability: at_risk,
        label,
        source: EstimatorMode::Model,
    })
}
