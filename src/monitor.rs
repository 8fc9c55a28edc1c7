//! Periodic collection and prediction tasks.
//!
//! Two loops share the sliding window. The collection loop closes one tick
//! of the [`EventTracker`] per period and appends the sample; the prediction
//! loop aggregates the window, scores it on a blocking worker and publishes
//! the record. The loops run on independent clocks and only synchronise
//! through the window.

use crate::collector::EventTracker;
use crate::core::aggregator::{AggregatedFeatures, WindowAggregator};
use crate::core::estimator::{EstimatorMode, PredictionResult, ScoreEstimator};
use crate::core::features::{FeatureVector, FeatureVectorBuilder};
use crate::core::record::PredictionRecord;
use crate::core::window::SlidingWindowBuffer;
use crate::store::RecordStore;
use crate::transparency::SharedTransparencyLog;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// One scoring pass over the window.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub aggregated: AggregatedFeatures,
    pub features: FeatureVector,
    pub result: PredictionResult,
}

/// Aggregate, build, estimate and publish.
pub struct PredictionPipeline {
    buffer: Arc<SlidingWindowBuffer>,
    aggregator: WindowAggregator,
    builder: FeatureVectorBuilder,
    estimator: Mutex<ScoreEstimator>,
    records: Arc<RecordStore>,
    stats: SharedTransparencyLog,
}

impl PredictionPipeline {
    pub fn new(
        buffer: Arc<SlidingWindowBuffer>,
        aggregator: WindowAggregator,
        builder: FeatureVectorBuilder,
        estimator: ScoreEstimator,
        records: Arc<RecordStore>,
        stats: SharedTransparencyLog,
    ) -> Self {
        Self {
            buffer,
            aggregator,
            builder,
            estimator: Mutex::new(estimator),
            records,
            stats,
        }
    }

    pub fn buffer(&self) -> &Arc<SlidingWindowBuffer> {
        &self.buffer
    }

    pub fn records(&self) -> &Arc<RecordStore> {
        &self.records
    }

    pub fn estimator_mode(&self) -> EstimatorMode {
        self.estimator().mode()
    }

    /// Score the current window. `None` while no sample has been collected.
    ///
    /// May block on model inference; call from a blocking worker.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Option<Evaluation> {
        let aggregated = self.aggregator.aggregate_at(&self.buffer, now);
        if aggregated.sample_count == 0 {
            tracing::debug!("window is empty, skipping prediction");
            return None;
        }

        let features = self.builder.build(&aggregated, now);
        let result = self.estimator().predict(&features);

        Some(Evaluation {
            aggregated,
            features,
            result,
        })
    }

    /// Run one prediction tick and publish the record.
    ///
    /// Store failures are logged and counted; they never stop the loop.
    pub fn tick(&self, now: DateTime<Utc>) -> Option<PredictionRecord> {
        let evaluation = self.evaluate(now)?;
        self.stats.record_prediction(evaluation.result.source);

        let record = match PredictionRecord::new(
            &evaluation.features,
            &evaluation.aggregated,
            &evaluation.result,
            now,
        ) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "could not serialize feature vector");
                self.stats.record_store_failure();
                return None;
            }
        };

        tracing::debug!(
            probability = record.probability,
            label = %record.label,
            source = %record.source,
            progress = record.collection_progress_percent,
            "prediction"
        );

        if let Err(e) = self.records.publish(record.clone()) {
            tracing::warn!(error = %e, "failed to persist prediction record");
            self.stats.record_store_failure();
        }

        Some(record)
    }

    /// Release the model collaborator; later ticks use heuristic scoring.
    pub fn release_model(&self) {
        self.estimator().release();
    }

    fn estimator(&self) -> std::sync::MutexGuard<'_, ScoreEstimator> {
        self.estimator.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PredictionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionPipeline")
            .field("samples", &self.buffer.size())
            .field("capacity", &self.buffer.capacity())
            .field("mode", &self.estimator_mode())
            .finish()
    }
}

/// Periods for the two loops.
#[derive(Debug, Clone, Copy)]
pub struct MonitorIntervals {
    pub collection: Duration,
    pub prediction: Duration,
}

/// Handle on the running collection and prediction tasks.
#[derive(Debug)]
pub struct UsageMonitor {
    pipeline: Arc<PredictionPipeline>,
    cancel: CancellationToken,
    collection: Option<JoinHandle<()>>,
    prediction: Option<JoinHandle<()>>,
}

impl UsageMonitor {
    /// Spawn both loops on the current tokio runtime.
    pub fn start(
        tracker: EventTracker,
        pipeline: PredictionPipeline,
        intervals: MonitorIntervals,
    ) -> Self {
        let pipeline = Arc::new(pipeline);
        let cancel = CancellationToken::new();

        let collection = tokio::spawn(collection_loop(
            tracker,
            Arc::clone(&pipeline.buffer),
            Arc::clone(&pipeline.stats),
            intervals.collection,
            cancel.child_token(),
        ));
        let prediction = tokio::spawn(prediction_loop(
            Arc::clone(&pipeline),
            intervals.prediction,
            cancel.child_token(),
        ));

        tracing::info!(
            collection_secs = intervals.collection.as_secs_f64(),
            prediction_secs = intervals.prediction.as_secs_f64(),
            mode = %pipeline.estimator_mode(),
            "usage monitor started"
        );

        Self {
            pipeline,
            cancel,
            collection: Some(collection),
            prediction: Some(prediction),
        }
    }

    pub fn pipeline(&self) -> &Arc<PredictionPipeline> {
        &self.pipeline
    }

    pub fn buffer(&self) -> &Arc<SlidingWindowBuffer> {
        self.pipeline.buffer()
    }

    /// Token that stops both loops when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Clear the window; collection continues from an empty buffer.
    pub fn reset_window(&self) {
        self.pipeline.buffer.clear();
        tracing::info!("sample window cleared");
    }

    /// Run a prediction outside the schedule.
    pub async fn predict_now(&self) -> Option<PredictionRecord> {
        let pipeline = Arc::clone(&self.pipeline);
        match tokio::task::spawn_blocking(move || pipeline.tick(Utc::now())).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(error = %e, "prediction worker failed");
                None
            }
        }
    }

    /// Stop both loops, wait for them, and release the model.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        for handle in [self.collection.take(), self.prediction.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "monitor task ended abnormally");
            }
        }

        self.pipeline.release_model();
        tracing::info!("usage monitor stopped");
    }
}

impl Drop for UsageMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn collection_loop(
    mut tracker: EventTracker,
    buffer: Arc<SlidingWindowBuffer>,
    stats: SharedTransparencyLog,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let sample = tracker.take_sample(period);
                stats.record_events(&tracker.take_tally());
                tracing::trace!(
                    screen_on_secs = sample.screen_on_secs,
                    scroll_pixels = sample.scroll_pixels,
                    unlocks = sample.unlock_count,
                    "sample"
                );
                buffer.add_sample(sample);
                stats.record_sample();
            }
            _ = cancel.cancelled() => {
                tracing::debug!("collection loop shutting down");
                break;
            }
        }
    }
}

async fn prediction_loop(
    pipeline: Arc<PredictionPipeline>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let pipeline = Arc::clone(&pipeline);
                if let Err(e) = tokio::task::spawn_blocking(move || pipeline.tick(Utc::now())).await {
                    tracing::error!(error = %e, "prediction worker failed");
                }
            }
            _ = cancel.cancelled() => {
                tracing::debug!("prediction loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::UsageEvent;
    use crate::core::aggregator::AggregatorConfig;
    use crate::core::catalog::AppCatalog;
    use crate::core::model::{LinearModel, ModelHandle};
    use crate::core::window::Sample;
    use crate::store::{KeyValueStore, StoreError};
    use crate::transparency::create_shared_log;
    use chrono::TimeZone;

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        fn put(&self, _key: &str, _value: String) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn pipeline(records: Arc<RecordStore>, estimator: ScoreEstimator) -> PredictionPipeline {
        PredictionPipeline::new(
            Arc::new(SlidingWindowBuffer::new(60)),
            WindowAggregator::new(
                AggregatorConfig {
                    timezone: Some(chrono_tz::UTC),
                    ..AggregatorConfig::default()
                },
                AppCatalog::default(),
            ),
            FeatureVectorBuilder::new(32, Some(chrono_tz::UTC)),
            estimator,
            records,
            create_shared_log(),
        )
    }

    fn busy_sample(at: DateTime<Utc>) -> Sample {
        Sample {
            screen_on_secs: 5,
            scroll_pixels: 100,
            unlock_count: 1,
            ..Sample::idle(at)
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_cold_start_publishes_nothing() {
        let records = Arc::new(RecordStore::in_memory());
        let pipeline = pipeline(Arc::clone(&records), ScoreEstimator::heuristic_only());

        assert!(pipeline.evaluate(noon()).is_none());
        assert!(pipeline.tick(noon()).is_none());
        assert!(records.latest().unwrap().is_none());
    }

    #[test]
    fn test_tick_publishes_record() {
        let records = Arc::new(RecordStore::in_memory());
        let pipeline = pipeline(Arc::clone(&records), ScoreEstimator::heuristic_only());
        for _ in 0..6 {
            pipeline.buffer().add_sample(busy_sample(noon()));
        }

        let record = pipeline.tick(noon()).unwrap();
        assert_eq!(record.collection_progress_percent, 10);
        assert_eq!(record.source, EstimatorMode::Heuristic);
        assert_eq!(record.timestamp_millis, noon().timestamp_millis());
        assert_eq!(records.latest().unwrap(), Some(record));
        assert_eq!(pipeline.stats.stats().heuristic_predictions, 1);
    }

    #[test]
    fn test_store_failure_does_not_stop_ticks() {
        let records = Arc::new(RecordStore::new(Arc::new(FailingStore)));
        let rx = records.subscribe();
        let pipeline = pipeline(records, ScoreEstimator::heuristic_only());
        pipeline.buffer().add_sample(busy_sample(noon()));

        assert!(pipeline.tick(noon()).is_some());
        assert!(pipeline.tick(noon()).is_some());
        assert_eq!(pipeline.stats.stats().store_failures, 2);
        assert!(rx.borrow().is_some());
    }

    #[test]
    fn test_release_model_switches_to_heuristic() {
        let model = LinearModel::new(vec![0.0; 48], 0.0);
        let estimator = ScoreEstimator::new(ModelHandle::from_model(Box::new(model)));
        let pipeline = pipeline(Arc::new(RecordStore::in_memory()), estimator);
        pipeline.buffer().add_sample(busy_sample(noon()));

        assert_eq!(pipeline.evaluate(noon()).unwrap().result.source, EstimatorMode::Model);
        pipeline.release_model();
        assert_eq!(pipeline.estimator_mode(), EstimatorMode::Heuristic);
        assert_eq!(
            pipeline.evaluate(noon()).unwrap().result.source,
            EstimatorMode::Heuristic
        );
    }

    #[tokio::test]
    async fn test_monitor_collects_and_predicts_until_stopped() {
        let records = Arc::new(RecordStore::in_memory());
        let tracker = EventTracker::new();
        tracker.submit(UsageEvent::screen_on()).unwrap();
        tracker.submit(UsageEvent::unlock()).unwrap();
        tracker.submit(UsageEvent::app_foreground("com.example.feed")).unwrap();

        let mut monitor = UsageMonitor::start(
            tracker,
            pipeline(Arc::clone(&records), ScoreEstimator::heuristic_only()),
            MonitorIntervals {
                collection: Duration::from_millis(20),
                prediction: Duration::from_millis(30),
            },
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        monitor.stop().await;

        let collected = monitor.buffer().size();
        assert!(collected > 0);
        assert!(records.latest().unwrap().is_some());

        // Loops are gone: the window no longer grows
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(monitor.buffer().size(), collected);

        let stats = monitor.pipeline().stats.stats();
        assert_eq!(stats.unlock_events, 1);
        assert!(stats.samples_collected >= collected as u64);
    }

    #[tokio::test]
    async fn test_reset_window_and_predict_now() {
        let records = Arc::new(RecordStore::in_memory());
        let mut monitor = UsageMonitor::start(
            EventTracker::new(),
            pipeline(Arc::clone(&records), ScoreEstimator::heuristic_only()),
            MonitorIntervals {
                collection: Duration::from_secs(3600),
                prediction: Duration::from_secs(3600),
            },
        );

        assert!(monitor.predict_now().await.is_none());

        monitor.buffer().add_sample(busy_sample(Utc::now()));
        let record = monitor.predict_now().await.unwrap();
        assert_eq!(record.collection_progress_percent, 1);

        monitor.reset_window();
        assert_eq!(monitor.buffer().size(), 0);
        monitor.stop().await;
    }
}
