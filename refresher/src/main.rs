#![warn(clippy::pedantic)]
use refresher::cache::DiskCache;
use refresher::error::MainError;
use refresher::gateway::HttpGateway;
use refresher::notify;
use refresher::orchestrator::{Orchestrator, OrchestratorConfig, SessionGate};
use refresher::scheduler::{Scheduler, SchedulerConfig};
use shared::error::ConfigError;
use shared::icao::Icao;
use shared::{init_tracing, load_config, shutdown_listener};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), MainError> {
    init_tracing()?;

    let config = load_config()?;
    let config = config
        .refresher
        .ok_or(ConfigError::MissingSection("refresher"))?;

    // Invalid entries are dropped with a warning rather than failing startup.
    let codes: Vec<Icao> = config
        .codes
        .iter()
        .filter_map(|raw| match raw.parse::<Icao>() {
            Ok(code) => Some(code),
            Err(e) => {
                warn!(code = %raw, error = %e, "ignoring invalid airport code in configuration");
                None
            }
        })
        .collect();

    let scheduler = Arc::new(Scheduler::new(SchedulerConfig {
        calls_per_window: config.calls_per_window,
        window: Duration::from_secs(config.window_seconds),
        inter_call_delay: Duration::from_millis(config.inter_call_delay_ms),
        safety_margin: Duration::from_millis(config.safety_margin_ms),
        retry_cap: config.retry_cap,
    }));
    let gateway = Arc::new(HttpGateway::new(
        reqwest::Client::new(),
        config.proxy_base_url.clone(),
    ));
    let cache = DiskCache::new(
        &config.cache_path,
        chrono::Duration::seconds(config.cache_freshness_seconds as i64),
    );
    let (events_tx, events_rx) = notify::channel();

    let orchestrator = Orchestrator::new(
        scheduler,
        gateway,
        Arc::new(SessionGate::new()),
        events_tx,
        Some(cache),
        OrchestratorConfig {
            auto_refresh_interval: Duration::from_secs(config.auto_refresh_interval_seconds),
            highlight_window: chrono::Duration::seconds(config.highlight_window_seconds as i64),
            sweep_interval: Duration::from_secs(config.marker_sweep_interval_seconds),
        },
    );

    let shutdown_token = CancellationToken::new();
    let signal_handle = tokio::spawn(shutdown_listener(Some(shutdown_token.clone())));

    info!(codes = codes.len(), "initialized NOTAM refresher");
    orchestrator.bootstrap(codes);

    let sink_handle = tokio::spawn(notify::run_sink(
        events_rx,
        chrono::Duration::hours(config.notify_recency_hours),
    ));
    let run_handle = tokio::spawn(Arc::clone(&orchestrator).run(shutdown_token.clone()));

    tokio::select! {
        res = run_handle => {
            shutdown_token.cancel();
            res?;
        }
        res = sink_handle => {
            shutdown_token.cancel();
            res?;
        }
        res = signal_handle => {
            shutdown_token.cancel();
            res?;
        }
    }

    Ok(())
}
