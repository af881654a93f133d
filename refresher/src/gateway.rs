use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use shared::icao::Icao;
use shared::notam::{NotamRecord, Provider, classify_raw, normalize};
use thiserror::Error;
use tracing::debug;

/// Failures crossing the gateway are all retryable from the scheduler's
/// point of view; the distinction only matters for logging.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("proxy returned error: {message}")]
    Upstream {
        message: String,
        details: Option<String>,
    },
}

/// The uniform proxy envelope: either a record batch tagged with the
/// provider that served it, or an error.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope {
    Success { data: Vec<Value>, source: String },
    Failure { error: String, details: Option<String> },
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub records: Vec<NotamRecord>,
    pub source: Provider,
}

/// The single effectful leaf of the refresh pipeline.
#[async_trait]
pub trait FetchGateway: Send + Sync {
    async fn fetch(&self, code: &Icao) -> Result<FetchOutcome, GatewayError>;
}

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }
}

#[async_trait]
impl FetchGateway for HttpGateway {
    async fn fetch(&self, code: &Icao) -> Result<FetchOutcome, GatewayError> {
        let url = format!("{}/api/notams?icao={code}", self.base_url);
        let envelope = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<Envelope>()
            .await?;

        match envelope {
            Envelope::Failure { error, details } => Err(GatewayError::Upstream {
                message: error,
                details,
            }),
            Envelope::Success { data, source } => {
                let source = match source.as_str() {
                    "secondary" => Provider::Secondary,
                    _ => Provider::Primary,
                };
                let total = data.len();
                let records: Vec<NotamRecord> = data
                    .iter()
                    .enumerate()
                    .filter_map(|(index, item)| {
                        classify_raw(item).and_then(|raw| normalize(&raw, code, index, source))
                    })
                    .collect();
                if records.len() < total {
                    debug!(
                        icao = %code,
                        dropped = total - records.len(),
                        "dropped raw items that failed normalization"
                    );
                }
                Ok(FetchOutcome { records, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_decodes_both_shapes() {
        let success: Envelope =
            serde_json::from_value(json!({ "data": [{ "raw": "E) RWY CLSD" }], "source": "secondary" }))
                .unwrap();
        assert!(matches!(success, Envelope::Success { ref data, ref source }
            if data.len() == 1 && source == "secondary"));

        let failure: Envelope =
            serde_json::from_value(json!({ "error": "Rate limited", "details": "retry later" }))
                .unwrap();
        assert!(matches!(failure, Envelope::Failure { ref error, .. } if error == "Rate limited"));

        let bare_failure: Envelope = serde_json::from_value(json!({ "error": "boom" })).unwrap();
        assert!(matches!(bare_failure, Envelope::Failure { details: None, .. }));
    }
}
