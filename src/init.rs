//! Model initialization with observable progress.
//!
//! The coordinator loads the model collaborator on a blocking worker and
//! publishes progress on a watch channel. Progress starts at 0.0, reaches
//! 1.0 exactly once when initialization finishes (whether or not a model
//! could be loaded), and never changes afterwards.

use crate::core::estimator::ScoreEstimator;
use crate::core::model::ModelHandle;
use tokio::sync::watch;

/// Read side of the initialization progress.
#[derive(Debug, Clone)]
pub struct InitProgress {
    rx: watch::Receiver<f32>,
}

impl InitProgress {
    /// Latest published progress, 0.0..=1.0.
    pub fn current(&self) -> f32 {
        *self.rx.borrow()
    }

    pub fn is_complete(&self) -> bool {
        self.current() >= 1.0
    }

    /// Wait until initialization completes. Returns `false` if the
    /// coordinator was dropped before finishing.
    pub async fn wait_complete(&mut self) -> bool {
        self.rx.wait_for(|p| *p >= 1.0).await.is_ok()
    }

    /// Wait for the next progress change.
    pub async fn changed(&mut self) -> Option<f32> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

/// Owns the progress channel for one initialization run.
#[derive(Debug)]
pub struct InitCoordinator {
    tx: watch::Sender<f32>,
}

impl InitCoordinator {
    pub fn new() -> (Self, InitProgress) {
        let (tx, rx) = watch::channel(0.0);
        (Self { tx }, InitProgress { rx })
    }

    /// Another subscriber for the same run.
    pub fn progress(&self) -> InitProgress {
        InitProgress {
            rx: self.tx.subscribe(),
        }
    }

    /// Report intermediate progress. Values are kept below 1.0 and never
    /// move backwards.
    pub fn report(&self, fraction: f32) {
        let fraction = fraction.clamp(0.0, 0.99);
        self.tx.send_if_modified(|current| {
            if fraction > *current {
                *current = fraction;
                true
            } else {
                false
            }
        });
    }

    /// Build the estimator, loading the model off the async runtime.
    ///
    /// Consumes the coordinator, so completion is published exactly once.
    pub async fn initialize(self, model: ModelHandle) -> ScoreEstimator {
        self.report(0.1);
        let estimator = match tokio::task::spawn_blocking(move || ScoreEstimator::new(model)).await {
            Ok(estimator) => estimator,
            Err(e) => {
                tracing::error!(error = %e, "model initialization worker failed");
                ScoreEstimator::heuristic_only()
            }
        };
        self.complete();
        estimator
    }

    fn complete(self) {
        self.tx.send_replace(1.0);
        tracing::info!("initialization complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::estimator::EstimatorMode;
    use crate::core::model::LinearModel;

    #[test]
    fn test_report_is_monotonic_and_below_one() {
        let (coordinator, progress) = InitCoordinator::new();
        coordinator.report(0.4);
        coordinator.report(0.2);
        assert_eq!(progress.current(), 0.4);

        coordinator.report(5.0);
        assert!(progress.current() < 1.0);
        assert!(!progress.is_complete());
    }

    #[tokio::test]
    async fn test_initialize_completes_once() {
        let (coordinator, mut progress) = InitCoordinator::new();
        let mut second = coordinator.progress();

        let estimator = coordinator.initialize(ModelHandle::none()).await;
        assert_eq!(estimator.mode(), EstimatorMode::Heuristic);

        assert!(progress.wait_complete().await);
        assert!(second.wait_complete().await);
        assert_eq!(progress.current(), 1.0);
        // Sender is gone; no further updates can arrive
        assert_eq!(progress.changed().await, None);
    }

    #[tokio::test]
    async fn test_initialize_with_model() {
        let (coordinator, progress) = InitCoordinator::new();
        let handle = ModelHandle::from_model(Box::new(LinearModel::new(vec![0.0; 48], 0.0)));

        let estimator = coordinator.initialize(handle).await;
        assert_eq!(estimator.mode(), EstimatorMode::Model);
        assert!(progress.is_complete());
    }

    #[tokio::test]
    async fn test_dropped_coordinator_never_completes() {
        let (coordinator, mut progress) = InitCoordinator::new();
        drop(coordinator);
        assert!(!progress.wait_complete().await);
    }
}
