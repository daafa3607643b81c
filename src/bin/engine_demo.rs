//! observatory demo — wires the whole engine together over a synthetic CDC
//! event stream: Store, Ingestor, Baselines, Detector, and AlertEngine under
//! one `CancellationToken`, shutting down cleanly on Ctrl-C.

use clap::Parser;
use observatory::alerts::{AlertEngine, LogNotifier, StoreMetricProvider};
use observatory::baseline::Baselines;
use observatory::clock::system_clock;
use observatory::config::{self, EngineConfig};
use observatory::detector::Detector;
use observatory::ingestor::Ingestor;
use observatory::model::{
    CdcEvent, CdcOp, Channel, ChannelId, ChannelKind, CompareWith, Condition, Operator, Rule, RuleId,
    Severity,
};
use observatory::store::Store;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "engine-demo")]
#[command(about = "Runs the observability engine against a synthetic CDC event stream")]
struct CliArgs {
    /// Path to the embedded time-series database.
    #[arg(long, env = "OBSERVATORY_DATA_DIR", default_value = "./data/observatory")]
    data_dir: String,

    /// Events per second emitted by the synthetic generator.
    #[arg(long, default_value = "20")]
    rate: u64,

    /// Run for this many seconds, then shut down (0 = run until Ctrl-C).
    #[arg(long, default_value = "0")]
    duration_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    config::init(EngineConfig::load());
    let cfg = config::get();

    info!("starting observatory engine demo");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received Ctrl-C, shutting down");
        shutdown.cancel();
    });

    let store = Arc::new(Store::open(
        &args.data_dir,
        cfg.storage.write_buffer_capacity,
        Duration::from_secs(cfg.storage.flush_interval_secs),
    )?);

    let ingestor = Arc::new(Ingestor::new(store.clone(), cfg.ingestor.queue_capacity, cancel.clone()));

    let baselines = Arc::new(Baselines::new(
        store.clone(),
        chrono::Duration::seconds(cfg.detector.baseline_window_secs),
        cfg.detector.min_samples_per_bucket,
        chrono::Duration::seconds(cfg.detector.baseline_cache_ttl_secs as i64),
    ));
    let detector = Arc::new(Detector::new(store.clone(), baselines.clone(), &cfg.detector));
    detector.set_anomaly_callback(Arc::new(|anomaly| {
        warn!(
            metric = %anomaly.metric,
            kind = ?anomaly.kind,
            score = anomaly.score,
            severity = %anomaly.severity,
            "{}",
            anomaly.description
        );
    }));

    let clock = system_clock();
    let provider = Arc::new(StoreMetricProvider::new(store.clone(), clock.clone()));
    let engine = AlertEngine::new(
        provider,
        clock,
        Duration::from_secs(cfg.engine.evaluation_interval_secs),
        cfg.engine.notification_queue_capacity,
        cancel.clone(),
    );
    engine.register_notifier(ChannelKind::Slack, Arc::new(LogNotifier)).await;

    let log_channel = engine
        .add_channel(Channel {
            id: ChannelId::new(),
            kind: ChannelKind::Slack,
            enabled: true,
            config: Default::default(),
        })
        .await;
    engine
        .add_rule(Rule {
            id: RuleId::new(),
            name: "orders spike".to_string(),
            metric: "orders_events_total".to_string(),
            condition: Condition {
                operator: Operator::Gt,
                threshold: 1000.0,
                compare_with: CompareWith::None,
                change_percent: 0.0,
            },
            duration: chrono::Duration::zero(),
            severity: Severity::Warning,
            channels: vec![log_channel],
            enabled: true,
            labels: Default::default(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        })
        .await;

    let generator_cancel = cancel.clone();
    let generator = tokio::spawn(generate_events(ingestor.clone(), detector.clone(), args.rate, generator_cancel));

    if args.duration_secs > 0 {
        let timed_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(args.duration_secs)).await;
            timed_cancel.cancel();
        });
    }

    cancel.cancelled().await;
    generator.abort();
    // The ingestor's own worker already observes `cancel` and stops with it;
    // dropping this last handle just releases the channel sender.
    drop(ingestor);

    info!("observatory engine demo shut down cleanly");
    Ok(())
}

/// Emits synthetic `orders` CDC events at roughly `rate` events/sec, with an
/// occasional amount spike fed straight through the detector so the demo has
/// something to flag without waiting on real baseline history.
async fn generate_events(ingestor: Arc<Ingestor>, detector: Arc<Detector>, rate: u64, cancel: CancellationToken) {
    let amount_dist = Normal::<f64>::new(50.0, 10.0).expect("fixed normal parameters are valid");
    let interval = Duration::from_millis((1000 / rate.max(1)).max(1));
    let mut ticker = tokio::time::interval(interval);
    let statuses = ["pending", "paid", "shipped", "cancelled"];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let (amount, status) = {
                    let mut rng = rand::thread_rng();
                    let spike = rng.gen_bool(0.01);
                    let amount = if spike { amount_dist.sample(&mut rng) * 8.0 } else { amount_dist.sample(&mut rng).max(0.0) };
                    let status = statuses[rng.gen_range(0..statuses.len())];
                    (amount, status)
                };

                let mut after = serde_json::Map::new();
                after.insert("total_amount".to_string(), serde_json::json!(amount));
                after.insert("status".to_string(), serde_json::json!(status));

                let now = chrono::Utc::now();
                ingestor.process(CdcEvent {
                    id: Uuid::new_v4(),
                    op: CdcOp::Insert,
                    schema: "public".to_string(),
                    table: "orders".to_string(),
                    timestamp: now,
                    before: None,
                    after: Some(after),
                    metadata: None,
                });

                let result = detector.detect("orders_total_amount", amount, now, &Default::default()).await;
                if result.is_anomaly {
                    info!(amount, explanation = %result.explanation, "orders_total_amount flagged");
                }
            }
        }
    }
}
