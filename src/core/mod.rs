//! Core aggregation pipeline.
//!
//! This module contains:
//! - The sliding window of per-tick samples
//! - Window aggregation and rescaling to the canonical window
//! - Feature vector construction with cyclical time encoding
//! - Score estimation with a model collaborator and heuristic fallback
//! - Prediction records for persistence

pub mod aggregator;
pub mod catalog;
pub mod estimator;
pub mod features;
pub mod model;
pub mod record;
pub mod window;

// Re-export commonly used types
pub use aggregator::{
    progress_percent, AggregatedFeatures, AggregatorConfig, MinSamplePolicy, UsageTotals,
    WindowAggregator,
};
pub use catalog::{AppCatalog, AppCategory};
pub use estimator::{
    EstimatorMode, HeuristicScorer, PredictionResult, RiskLabel, ScoreEstimator,
};
pub use features::{
    AppEmbeddingSource, CategoryEmbedding, CyclicalTime, FeatureVector, FeatureVectorBuilder,
    TimeOfDay, DEFAULT_EMBEDDING_DIM, SCALAR_FEATURES,
};
pub use model::{
    LinearModel, LinearModelLoader, ModelError, ModelHandle, ModelLoader, ModelOutput, UsageModel,
};
pub use record::PredictionRecord;
pub use window::{Sample, SlidingWindowBuffer, DEFAULT_CAPACITY};
