//! Usage Sentinel CLI
//!
//! On-device phone-usage risk monitor.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use usage_sentinel::{
    collector::{spawn_json_lines_feed, EventTracker},
    config::Config,
    core::{
        AppCatalog, CategoryEmbedding, FeatureVectorBuilder, LinearModelLoader, ModelHandle,
        SlidingWindowBuffer, WindowAggregator,
    },
    init::InitCoordinator,
    monitor::{MonitorIntervals, PredictionPipeline, UsageMonitor},
    store::{AlertThreshold, JsonFileStore, RecordStore},
    transparency::{create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog},
    PredictionRecord, PRIVACY_DECLARATION, VERSION,
};

#[derive(Parser)]
#[command(name = "usage-sentinel")]
#[command(version = VERSION)]
#[command(about = "On-device phone-usage risk monitor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start monitoring a JSON-lines usage event feed
    Start {
        /// Event file to read (defaults to stdin)
        #[arg(long, short)]
        events: Option<PathBuf>,

        /// Linear model weights file (overrides the configured model)
        #[arg(long)]
        model: Option<PathBuf>,
    },

    /// Show the latest prediction and collection statistics
    Status,

    /// Set the alert threshold (0-100)
    Threshold {
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },

    /// Clear the stored prediction and collection statistics
    Reset,

    /// Display privacy declaration
    Privacy,

    /// Show configuration
    Config,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { events, model } => cmd_start(events, model),
        Commands::Status => cmd_status(),
        Commands::Threshold { value } => cmd_threshold(value),
        Commands::Reset => cmd_reset(),
        Commands::Privacy => {
            cmd_privacy();
            Ok(())
        }
        Commands::Config => cmd_config(),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_records(config: &Config) -> Result<Arc<RecordStore>> {
    let store = JsonFileStore::open(config.store_path())
        .with_context(|| format!("could not open store at {:?}", config.store_path()))?;
    Ok(Arc::new(RecordStore::new(Arc::new(store))))
}

fn cmd_start(events: Option<PathBuf>, model: Option<PathBuf>) -> Result<()> {
    println!("Usage Sentinel v{VERSION}");
    println!();

    let mut config = Config::load().context("could not load configuration")?;
    if model.is_some() {
        config.model_path = model;
    }
    config
        .ensure_directories()
        .context("could not create data directory")?;

    let reader: Box<dyn BufRead + Send> = match &events {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path).with_context(|| format!("could not open {path:?}"))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    println!("Starting monitor...");
    println!(
        "  Events: {}",
        events
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdin".to_string())
    );
    println!(
        "  Window: {} samples × {}s",
        config.window_capacity,
        config.collection_interval.as_secs()
    );
    println!("  Prediction interval: {}s", config.prediction_interval.as_secs());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let records = open_records(&config)?;
    let stats = create_shared_log_with_persistence(config.stats_path());

    let runtime = tokio::runtime::Runtime::new().context("could not start async runtime")?;
    let result = runtime.block_on(run_monitor(&config, reader, Arc::clone(&records), Arc::clone(&stats)));
    // The feed thread may still be blocked on stdin
    runtime.shutdown_timeout(Duration::from_secs(1));
    result?;

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save collection stats: {e}");
    }

    println!();
    println!("{}", stats.summary());
    Ok(())
}

async fn run_monitor(
    config: &Config,
    reader: Box<dyn BufRead + Send>,
    records: Arc<RecordStore>,
    stats: SharedTransparencyLog,
) -> Result<()> {
    let timezone = config.timezone()?;

    let handle = match &config.model_path {
        Some(path) => ModelHandle::new(LinearModelLoader::new(path)),
        None => ModelHandle::none(),
    };
    let (coordinator, mut progress) = InitCoordinator::new();
    tokio::spawn(async move {
        while let Some(fraction) = progress.changed().await {
            tracing::debug!(progress = fraction, "initializing");
        }
    });
    let estimator = coordinator.initialize(handle).await;
    println!("Scoring mode: {}", estimator.mode());

    let catalog = AppCatalog::default();
    let pipeline = PredictionPipeline::new(
        Arc::new(SlidingWindowBuffer::new(config.window_capacity)),
        WindowAggregator::new(config.aggregator_config()?, catalog.clone()),
        FeatureVectorBuilder::new(config.embedding_dim, timezone)
            .with_embedding_source(Arc::new(CategoryEmbedding::new(catalog))),
        estimator,
        Arc::clone(&records),
        stats,
    );

    let tracker = EventTracker::new();
    let feed = spawn_json_lines_feed(reader, tracker.sender());
    let feed_done = tokio::task::spawn_blocking(move || feed.join());

    let threshold = records.alert_threshold().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "using default alert threshold");
        AlertThreshold::default()
    });
    let mut updates = records.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let latest = updates.borrow_and_update().clone();
            if let Some(record) = latest {
                print_record(&record, threshold);
            }
        }
    });

    let mut monitor = UsageMonitor::start(
        tracker,
        pipeline,
        MonitorIntervals {
            collection: config.collection_interval,
            prediction: config.prediction_interval,
        },
    );

    let cancel = monitor.cancellation_token();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || on_interrupt.cancel()).context("could not set Ctrl+C handler")?;

    tokio::select! {
        _ = cancel.cancelled() => {
            println!();
            println!("Stopping monitor...");
        }
        joined = feed_done => {
            match joined {
                Ok(Ok(Ok(summary))) => println!(
                    "End of input: {} events forwarded, {} lines skipped",
                    summary.forwarded, summary.skipped
                ),
                Ok(Ok(Err(e))) => eprintln!("Event feed failed: {e}"),
                Ok(Err(_)) | Err(_) => eprintln!("Event feed thread panicked"),
            }
            // Let the last events land in a sample before the final score
            tokio::time::sleep(config.collection_interval).await;
            if monitor.predict_now().await.is_none() {
                println!("No samples collected.");
            }
        }
    }

    monitor.stop().await;
    Ok(())
}

fn print_record(record: &PredictionRecord, threshold: AlertThreshold) {
    let at = record
        .timestamp()
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());

    println!(
        "[{at}] score {:>3}% {} ({}) | window {}%",
        record.score_percent(),
        record.label,
        record.source,
        record.collection_progress_percent
    );
    if record.exceeds(threshold.value()) {
        println!("  ! score is at or above the alert threshold ({}%)", threshold.value());
    }
}

fn cmd_status() -> Result<()> {
    let config = Config::load().context("could not load configuration")?;
    let records = open_records(&config)?;

    println!("Usage Sentinel Status");
    println!("=====================");
    println!();

    let threshold = records.alert_threshold()?;
    println!("Alert threshold: {}%", threshold.value());
    println!();

    match records.latest()? {
        Some(record) => {
            println!("Latest prediction:");
            print_record(&record, threshold);
        }
        None => println!("No prediction yet."),
    }
    println!();

    if config.stats_path().exists() {
        let stats = TransparencyLog::with_persistence(config.stats_path()).stats();
        println!("Cumulative Statistics:");
        println!("  Screen events: {}", stats.screen_events);
        println!("  Unlock events: {}", stats.unlock_events);
        println!("  App events: {}", stats.app_events);
        println!("  Scroll events: {}", stats.scroll_events);
        println!("  Samples collected: {}", stats.samples_collected);
        println!(
            "  Predictions (model / heuristic): {} / {}",
            stats.model_predictions, stats.heuristic_predictions
        );
        println!("  Store failures: {}", stats.store_failures);
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_threshold(value: i64) -> Result<()> {
    let config = Config::load().context("could not load configuration")?;
    let threshold = AlertThreshold::new(value)?;
    open_records(&config)?.set_alert_threshold(threshold)?;
    println!("Alert threshold set to {}%.", threshold.value());
    Ok(())
}

fn cmd_reset() -> Result<()> {
    let config = Config::load().context("could not load configuration")?;
    open_records(&config)?.clear()?;

    let stats = TransparencyLog::with_persistence(config.stats_path());
    stats.reset();
    stats.save().context("could not save collection stats")?;

    println!("Stored prediction and collection statistics cleared.");
    Ok(())
}

fn cmd_privacy() {
    println!("{PRIVACY_DECLARATION}");
}

fn cmd_config() -> Result<()> {
    let config = Config::load().context("could not load configuration")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
