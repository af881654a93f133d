use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use shared::icao::IcaoError;
use thiserror::Error;
use tracing::warn;

/// Error body returned to the dashboard. `details` is safe, human-readable
/// context; upstream credentials and raw upstream bodies never appear here.
#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    InvalidCode(#[from] IcaoError),
    #[error("upstream rate limit hit")]
    RateLimited,
    #[error("upstream request failed")]
    Upstream(#[from] reqwest::Error),
    #[error("no provider could serve {code}")]
    AllProvidersFailed { code: String },
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ProxyError::InvalidCode(e) => {
                (StatusCode::BAD_REQUEST, ErrorMessage {
                    error: "Invalid ICAO code".to_string(),
                    details: Some(e.to_string()),
                })
            }
            ProxyError::RateLimited => {
                warn!("upstream rate limit reached");
                (StatusCode::TOO_MANY_REQUESTS, ErrorMessage {
                    error: "Rate limited by upstream provider".to_string(),
                    details: Some("Reduce the refresh rate and try again".to_string()),
                })
            }
            ProxyError::Upstream(e) => {
                warn!(error = %e, "upstream request failed");
                (StatusCode::BAD_GATEWAY, ErrorMessage {
                    error: "Upstream provider request failed".to_string(),
                    details: None,
                })
            }
            ProxyError::AllProvidersFailed { code } => {
                warn!(icao = %code, "all providers failed");
                (StatusCode::BAD_GATEWAY, ErrorMessage {
                    error: format!("No NOTAM provider could serve {code}"),
                    details: None,
                })
            }
        };
        (status, Json(message)).into_response()
    }
}
