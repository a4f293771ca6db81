//! Adaptive insights service: binary entrypoint.
//! Loads config, opens the store, wires the analytics engine into the HTTP trigger
//! and optionally re-runs the batch on a fixed interval.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use adaptive_insights::{
    api::{create_router, AppState},
    batch::run_batch,
    config::AnalyticsConfig,
    engine::AnalyticsEngine,
    insight::build_provider,
    metrics::Metrics,
    store::{DynStore, MemoryStore},
};

const ENV_BIND_ADDR: &str = "BIND_ADDR";
const ENV_STORE_SNAPSHOT: &str = "STORE_SNAPSHOT_PATH";
const ENV_INTERVAL_SECS: &str = "ANALYSIS_INTERVAL_SECS";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Compact logs by default, JSON lines when LOG_FORMAT=json.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("adaptive_insights=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn parse_interval(raw: Option<String>) -> Option<Duration> {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let metrics = Metrics::init()?;
    let cfg = AnalyticsConfig::load_default()?;

    let store: DynStore = match std::env::var(ENV_STORE_SNAPSHOT) {
        Ok(path) => Arc::new(
            MemoryStore::open(&path)
                .await
                .with_context(|| format!("failed to open store snapshot {path}"))?,
        ),
        Err(_) => {
            warn!("{ENV_STORE_SNAPSHOT} not set; using a volatile in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let provider = build_provider(&cfg.llm)?;
    info!(
        provider = provider.name(),
        store = store.name(),
        window_days = cfg.window_days,
        "analytics engine ready"
    );
    let engine = Arc::new(AnalyticsEngine::from_config(store, provider, &cfg));

    if let Some(every) = parse_interval(std::env::var(ENV_INTERVAL_SECS).ok()) {
        let engine = engine.clone();
        let window_days = i64::from(cfg.window_days);
        let concurrency = cfg.batch.concurrency;
        info!(interval_secs = every.as_secs(), "periodic analysis enabled");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = run_batch(engine.clone(), window_days, concurrency).await {
                    warn!(error = %e, "periodic analysis batch failed");
                }
            }
        });
    }

    let state = AppState {
        engine,
        window_days: i64::from(cfg.window_days),
        concurrency: cfg.batch.concurrency,
    };
    let router = create_router(state).merge(metrics.router());

    let addr: SocketAddr = std::env::var(ENV_BIND_ADDR)
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
        .parse()
        .context("invalid BIND_ADDR")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}
