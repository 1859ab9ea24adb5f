//! Geohash stock alarm daemon.
//! Wires the coordinator to tokio timers, the connectivity monitor, the DJIA
//! fetcher and the webhook notifiers, then serves `/status` and `/metrics`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use geohash_alarm::api::{self, ApiState};
use geohash_alarm::config::{AlarmConfig, ConfigLocationStore};
use geohash_alarm::fetch::djia::DjiaFetcher;
use geohash_alarm::matcher::{KnownLocationStore, StaticLocations};
use geohash_alarm::metrics::Metrics;
use geohash_alarm::scheduler::connectivity::TcpConnectivity;
use geohash_alarm::scheduler::timers::TokioTimers;
use geohash_alarm::scheduler::AlarmScheduler;
use geohash_alarm::worker::{BootOptions, Worker};
use geohash_alarm::{FetchCoordinator, NotifierMux};

/// Compact logs by default; `LOG_FORMAT=json` for structured output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("geohash_alarm=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("ctrl-c handler failed: {e}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let (cfg, cfg_path) = AlarmConfig::load_default()?;
    let calc = cfg.calculator()?;
    let metrics = Metrics::init()?;

    let (tx, rx) = mpsc::unbounded_channel();

    let timers = Arc::new(TokioTimers::new(tx.clone()));
    let monitor = Arc::new(TcpConnectivity::new(
        cfg.check_addr.clone(),
        Duration::from_secs(cfg.check_interval_secs),
        tx.clone(),
    ));
    let scheduler =
        AlarmScheduler::new(timers, monitor, calc).with_retry_after(cfg.retry_after());

    let fetcher = Arc::new(
        DjiaFetcher::new(cfg.djia_url.clone(), cfg.graticule()?, tx.clone())
            .with_timeout(cfg.fetch_timeout_secs),
    );
    let locations: Arc<dyn KnownLocationStore> = match cfg_path {
        Some(path) => Arc::new(ConfigLocationStore::new(path)),
        None => Arc::new(StaticLocations(cfg.known_locations.clone())),
    };
    let sink = Arc::new(NotifierMux::from_env());

    let coordinator = FetchCoordinator::new(calc, scheduler, fetcher, locations, sink);
    let (mut worker, status) = Worker::new(coordinator, rx, Some(cfg.state_path.clone()));
    worker
        .boot(BootOptions {
            alarm_enabled: cfg.enabled,
            fetch_on_boot: cfg.fetch_on_boot,
        })
        .await;
    let worker_task = worker.spawn();

    let app = api::router(ApiState::new(status, tx)).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;
    tracing::info!(addr = %cfg.listen_addr, graticule = %cfg.graticule, "geohash alarm up");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    worker_task.abort();
    tracing::info!("bye");
    Ok(())
}
