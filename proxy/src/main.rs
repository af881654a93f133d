mod error;
mod upstream;

use crate::error::ProxyError;
use crate::upstream::{FaaClient, NavCanadaClient};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::{Router, routing::get};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::error::ConfigError;
use shared::icao::Icao;
use shared::{init_tracing, load_config, shutdown_listener};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    faa: FaaClient,
    navcanada: NavCanadaClient,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing()?;

    let config = load_config()?;
    let config = config.proxy.ok_or(ConfigError::MissingSection("proxy"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_seconds))
        .build()?;
    let state = AppState {
        faa: FaaClient::new(
            client.clone(),
            config.faa_base_url,
            config.faa_client_id,
            config.faa_client_secret,
        ),
        navcanada: NavCanadaClient::new(client, config.navcanada_base_url),
    };

    let app = Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/api/notams", get(notams))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("starting NOTAM proxy at {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_listener(None))
        .await?;

    Ok(())
}

#[derive(Deserialize)]
struct NotamParams {
    icao: String,
}

#[derive(Serialize)]
struct NotamResponse {
    data: Vec<Value>,
    source: &'static str,
}

/// One airport per request. The primary provider is always tried first; for
/// Canadian aerodromes an empty or failed primary response falls through to
/// the secondary provider instead of returning nothing.
async fn notams(
    State(state): State<AppState>,
    Query(params): Query<NotamParams>,
) -> Result<Json<NotamResponse>, ProxyError> {
    let code: Icao = params.icao.parse()?;

    match state.faa.fetch(&code).await {
        Ok(data) if !data.is_empty() || !code.is_canadian() => {
            return Ok(Json(NotamResponse {
                data,
                source: "primary",
            }));
        }
        Ok(_) => {
            info!(icao = %code, "primary provider empty, trying secondary");
        }
        Err(ProxyError::RateLimited) => return Err(ProxyError::RateLimited),
        Err(e) if code.is_canadian() => {
            warn!(icao = %code, error = %e, "primary provider failed, trying secondary");
        }
        Err(e) => return Err(e),
    }

    match state.navcanada.fetch(&code).await {
        Ok(data) => Ok(Json(NotamResponse {
            data,
            source: "secondary",
        })),
        Err(ProxyError::RateLimited) => Err(ProxyError::RateLimited),
        Err(e) => {
            warn!(icao = %code, error = %e, "secondary provider failed");
            Err(ProxyError::AllProvidersFailed {
                code: code.to_string(),
            })
        }
    }
}
