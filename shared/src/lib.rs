pub mod icao;
pub mod notam;

use crate::error::ConfigError;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const ENV_VAR_PREFIX: &str = "NOTAM_WATCH__";
pub const SETTINGS_FILE: &str = "Settings.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub refresher: Option<RefresherConfig>,
    pub proxy: Option<ProxyConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefresherConfig {
    pub proxy_base_url: String,
    #[serde(default)]
    pub codes: Vec<String>,
    #[serde(default = "defaults::calls_per_window")]
    pub calls_per_window: usize,
    #[serde(default = "defaults::window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "defaults::inter_call_delay_ms")]
    pub inter_call_delay_ms: u64,
    #[serde(default = "defaults::safety_margin_ms")]
    pub safety_margin_ms: u64,
    #[serde(default = "defaults::retry_cap")]
    pub retry_cap: u32,
    #[serde(default = "defaults::auto_refresh_interval_seconds")]
    pub auto_refresh_interval_seconds: u64,
    #[serde(default = "defaults::highlight_window_seconds")]
    pub highlight_window_seconds: u64,
    #[serde(default = "defaults::marker_sweep_interval_seconds")]
    pub marker_sweep_interval_seconds: u64,
    #[serde(default = "defaults::cache_path")]
    pub cache_path: String,
    #[serde(default = "defaults::cache_freshness_seconds")]
    pub cache_freshness_seconds: u64,
    #[serde(default = "defaults::notify_recency_hours")]
    pub notify_recency_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    #[serde(default = "defaults::listen_addr")]
    pub listen_addr: String,
    pub faa_client_id: String,
    pub faa_client_secret: String,
    #[serde(default = "defaults::faa_base_url")]
    pub faa_base_url: String,
    #[serde(default = "defaults::navcanada_base_url")]
    pub navcanada_base_url: String,
    #[serde(default = "defaults::request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

mod defaults {
    pub fn calls_per_window() -> usize {
        25
    }
    pub fn window_seconds() -> u64 {
        65
    }
    pub fn inter_call_delay_ms() -> u64 {
        3000
    }
    pub fn safety_margin_ms() -> u64 {
        500
    }
    pub fn retry_cap() -> u32 {
        3
    }
    pub fn auto_refresh_interval_seconds() -> u64 {
        300
    }
    pub fn highlight_window_seconds() -> u64 {
        60
    }
    pub fn marker_sweep_interval_seconds() -> u64 {
        10
    }
    pub fn cache_path() -> String {
        "notam-cache.json".to_string()
    }
    pub fn cache_freshness_seconds() -> u64 {
        300
    }
    pub fn notify_recency_hours() -> i64 {
        4
    }
    pub fn listen_addr() -> String {
        "0.0.0.0:3001".to_string()
    }
    pub fn faa_base_url() -> String {
        "https://external-api.faa.gov/notamapi/v1".to_string()
    }
    pub fn navcanada_base_url() -> String {
        "https://plan.navcanada.ca/weather/api/alpha".to_string()
    }
    pub fn request_timeout_seconds() -> u64 {
        15
    }
}

pub fn load_config() -> Result<Config, ConfigError> {
    Ok(Figment::new()
        .merge(Toml::file(SETTINGS_FILE))
        .merge(Env::prefixed(ENV_VAR_PREFIX).split("__"))
        .extract::<Config>()?)
}

pub mod error {
    use thiserror::Error;
    use tracing::dispatcher::SetGlobalDefaultError;

    #[derive(Debug, Error)]
    pub enum ConfigError {
        #[error("failed to load configuration: {0}")]
        Figment(#[from] figment::Error),
        #[error("missing configuration section: {0}")]
        MissingSection(&'static str),
    }

    #[derive(Debug, Error)]
    pub enum InitializationError {
        #[error(transparent)]
        Tracing(#[from] SetGlobalDefaultError),
        #[error(transparent)]
        Config(#[from] ConfigError),
        #[error(transparent)]
        Io(#[from] std::io::Error),
    }
}

pub fn init_tracing() -> Result<(), error::InitializationError> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

pub async fn shutdown_listener(token: Option<CancellationToken>) {
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(name: "signal.ctrlc.received", "received Ctrl+C signal, shutting down"),
        _ = terminate => info!(name: "signal.sigterm.received", "received SIGTERM signal, shutting down"),
    }

    if let Some(token) = token {
        token.cancel();
    }
}
