//! External predictive model collaborator.
//!
//! The estimator only sees the [`UsageModel`] trait. A [`ModelHandle`] owns
//! the loader and the lazily constructed model: it is built once, reused for
//! every prediction, and released explicitly with [`ModelHandle::reset`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by a model collaborator.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model failed to load: {0}")]
    Load(String),

    #[error("Model unavailable: {0}")]
    Unavailable(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Input shape mismatch: expected {expected} values, got {actual}")]
    InputShape { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid model file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raw model output: class probabilities for {normal, at-risk} and an
/// optional discrete label (0 = normal, 1 = at-risk).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub probabilities: Vec<f32>,
    pub label: Option<i64>,
}

/// A loaded predictive model.
pub trait UsageModel: Send {
    /// Run inference over a flat input vector.
    fn predict(&mut self, input: &[f32]) -> Result<ModelOutput, ModelError>;

    /// Input width the model expects, if fixed.
    fn input_width(&self) -> Option<usize> {
        None
    }
}

/// Constructs a [`UsageModel`].
pub trait ModelLoader: Send {
    fn load(&self) -> Result<Box<dyn UsageModel>, ModelError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String {
        "model".to_string()
    }
}

enum HandleState {
    Unloaded,
    Ready(Box<dyn UsageModel>),
    Failed(String),
}

/// Owned, lazily initialized model.
///
/// A failed load is cached until [`reset`](Self::reset); the loader is not
/// retried on every call.
pub struct ModelHandle {
    loader: Option<Box<dyn ModelLoader>>,
    state: HandleState,
}

impl ModelHandle {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Some(Box::new(loader)),
            state: HandleState::Unloaded,
        }
    }

    /// A handle with no model configured.
    pub fn none() -> Self {
        Self {
            loader: None,
            state: HandleState::Unloaded,
        }
    }

    /// Wrap an already constructed model.
    pub fn from_model(model: Box<dyn UsageModel>) -> Self {
        Self {
            loader: None,
            state: HandleState::Ready(model),
        }
    }

    /// Get the model, loading it on first use.
    pub fn get(&mut self) -> Result<&mut dyn UsageModel, ModelError> {
        if matches!(self.state, HandleState::Unloaded) {
            self.state = match &self.loader {
                Some(loader) => match loader.load() {
                    Ok(model) => {
                        tracing::info!(model = %loader.describe(), "model loaded");
                        HandleState::Ready(model)
                    }
                    Err(e) => HandleState::Failed(e.to_string()),
                },
                None => HandleState::Failed("no model configured".to_string()),
            };
        }

        match &mut self.state {
            HandleState::Ready(model) => Ok(model.as_mut()),
            HandleState::Failed(reason) => Err(ModelError::Unavailable(reason.clone())),
            HandleState::Unloaded => Err(ModelError::Unavailable("not loaded".to_string())),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, HandleState::Ready(_))
    }

    /// Drop the loaded model (or cached failure). The next [`get`](Self::get)
    /// loads again.
    pub fn reset(&mut self) {
        self.state = HandleState::Unloaded;
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            HandleState::Unloaded => "unloaded",
            HandleState::Ready(_) => "ready",
            HandleState::Failed(_) => "failed",
        };
        f.debug_struct("ModelHandle")
            .field("configured", &self.loader.is_some())
            .field("state", &state)
            .finish()
    }
}

/// Logistic model over the flat feature input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f32>,
    pub bias: f32,
}

impl LinearModel {
    pub fn new(weights: Vec<f32>, bias: f32) -> Self {
        Self { weights, bias }
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let model: LinearModel = serde_json::from_str(json)?;
        if model.weights.is_empty() {
            return Err(ModelError::Load("model has no weights".to_string()));
        }
        Ok(model)
    }
}

impl UsageModel for LinearModel {
    fn predict(&mut self, input: &[f32]) -> Result<ModelOutput, ModelError> {
        if input.len() != self.weights.len() {
            return Err(ModelError::InputShape {
                expected: self.weights.len(),
                actual: input.len(),
            });
        }

        let z: f32 = self
            .weights
            .iter()
            .zip(input)
            .map(|(w, x)| w * x)
            .sum::<f32>()
            + self.bias;
        let p = 1.0 / (1.0 + (-z).exp());

        Ok(ModelOutput {
            probabilities: vec![1.0 - p, p],
            label: Some(i64::from(p > 0.5)),
        })
    }

    fn input_width(&self) -> Option<usize> {
        Some(self.weights.len())
    }
}

/// Loads a [`LinearModel`] from a JSON file (`{"weights": [...], "bias": 0.0}`).
#[derive(Debug, Clone)]
pub struct LinearModelLoader {
    path: PathBuf,
}

impl LinearModelLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelLoader for LinearModelLoader {
    fn load(&self) -> Result<Box<dyn UsageModel>, ModelError> {
        let content = std::fs::read_to_string(&self.path)?;
        Ok(Box::new(LinearModel::from_json(&content)?))
    }

    fn describe(&self) -> String {
        format!("linear model at {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingLoader {
        loads: Arc<AtomicUsize>,
        fail: bool,
    }

    impl ModelLoader for CountingLoader {
        fn load(&self) -> Result<Box<dyn UsageModel>, ModelError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ModelError::Load("missing".into()))
            } else {
                Ok(Box::new(LinearModel::new(vec![1.0], 0.0)))
            }
        }
    }

    #[test]
    fn test_handle_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let mut handle = ModelHandle::new(CountingLoader {
            loads: Arc::clone(&loads),
            fail: false,
        });

        assert!(!handle.is_loaded());
        handle.get().unwrap();
        handle.get().unwrap();
        assert!(handle.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        handle.reset();
        assert!(!handle.is_loaded());
        handle.get().unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handle_caches_failure() {
        let loads = Arc::new(AtomicUsize::new(0));
        let mut handle = ModelHandle::new(CountingLoader {
            loads: Arc::clone(&loads),
            fail: true,
        });

        assert!(matches!(handle.get(), Err(ModelError::Unavailable(_))));
        assert!(matches!(handle.get(), Err(ModelError::Unavailable(_))));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unconfigured_handle() {
        let mut handle = ModelHandle::none();
        assert!(handle.get().is_err());
    }

    #[test]
    fn test_linear_model_output() {
        let mut model = LinearModel::new(vec![1.0, -1.0], 0.0);
        let output = model.predict(&[2.0, 2.0]).unwrap();
        assert_eq!(output.probabilities.len(), 2);
        assert!((output.probabilities[1] - 0.5).abs() < 1e-6);
        assert_eq!(output.label, Some(0));

        let output = model.predict(&[3.0, 0.0]).unwrap();
        assert!(output.probabilities[1] > 0.9);
        assert_eq!(output.label, Some(1));
    }

    #[test]
    fn test_linear_model_rejects_wrong_width() {
        let mut model = LinearModel::new(vec![1.0, 1.0], 0.0);
        assert!(matches!(
            model.predict(&[1.0]),
            Err(ModelError::InputShape {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_linear_model_from_json() {
        let model = LinearModel::from_json(r#"{"weights":[0.5,0.25],"bias":-1.0}"#).unwrap();
        assert_eq!(model.weights, vec![0.5, 0.25]);
        assert!(LinearModel::from_json(r#"{"weights":[],"bias":0.0}"#).is_err());
        assert!(LinearModel::from_json("not json").is_err());
    }

    #[test]
    fn test_loader_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, r#"{"weights":[1.0],"bias":0.0}"#).unwrap();

        let loader = LinearModelLoader::new(&path);
        let mut model = loader.load().unwrap();
        assert_eq!(model.input_width(), Some(1));
        assert!(model.predict(&[0.0]).is_ok());

        let missing = LinearModelLoader::new(dir.path().join("missing.json"));
        assert!(matches!(missing.load(), Err(ModelError::Io(_))));
    }
}
