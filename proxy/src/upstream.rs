use crate::error::ProxyError;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use shared::icao::Icao;
use shared::notam::extract_items;
use shared::notam::normalize::parse_timestamp;
use std::cmp::Reverse;
use tracing::debug;

/// Upper bound on items returned per airport; keeps one busy hub from
/// dominating the response payload.
const MAX_ITEMS: usize = 50;

/// FAA NOTAM API client. Credentials travel only as request headers here;
/// they are never logged and never included in responses.
#[derive(Clone)]
pub struct FaaClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl FaaClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id,
            client_secret,
        }
    }

    pub async fn fetch(&self, code: &Icao) -> Result<Vec<Value>, ProxyError> {
        let url = format!("{}/notams", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("icaoLocation", code.as_str()), ("pageSize", "1000")])
            .header("client_id", &self.client_id)
            .header("client_secret", &self.client_secret)
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProxyError::RateLimited);
        }
        let payload = response.error_for_status()?.json::<Value>().await?;
        let items = prepare_faa_items(&payload);
        debug!(icao = %code, count = items.len(), "primary provider items");
        Ok(items)
    }
}

/// Nav Canada CFPS client, used as the fallback for Canadian aerodromes.
#[derive(Clone)]
pub struct NavCanadaClient {
    client: reqwest::Client,
    base_url: String,
}

impl NavCanadaClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch(&self, code: &Icao) -> Result<Vec<Value>, ProxyError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("site", code.as_str()), ("alpha", "notam")])
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProxyError::RateLimited);
        }
        let payload = response.error_for_status()?.json::<Value>().await?;
        let items = extract_items(&payload, code);
        debug!(icao = %code, count = items.len(), "secondary provider items");
        Ok(items)
    }
}

/// Flatten, filter, and order the FAA response: unwrap the GeoJSON nesting,
/// drop notices already expired, then sort closures first, then surface
/// condition reports, then friction reports, newest first within each tier,
/// capped at [`MAX_ITEMS`].
fn prepare_faa_items(payload: &Value) -> Vec<Value> {
    let Some(items) = payload.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut flattened: Vec<Value> = items
        .iter()
        .filter_map(flatten_faa_item)
        .filter(is_active)
        .collect();
    flattened.sort_by_key(sort_key);
    flattened.truncate(MAX_ITEMS);
    flattened
}

/// One FAA item is a GeoJSON feature wrapping `properties.coreNOTAMData`.
/// Pull the notice fields and the English translation up into a flat object.
fn flatten_faa_item(item: &Value) -> Option<Value> {
    let core = item.get("properties")?.get("coreNOTAMData")?;
    let notam = core.get("notam")?;
    let translation = core
        .get("notamTranslation")
        .and_then(Value::as_array)
        .and_then(|t| t.first());

    let body = translation
        .and_then(|t| t.get("formattedText").and_then(Value::as_str))
        .or_else(|| notam.get("text").and_then(Value::as_str))?;

    let mut out = Map::new();
    out.insert("body".to_string(), json!(body));
    for (target, source) in [
        ("number", "number"),
        ("validFrom", "effectiveStart"),
        ("validTo", "effectiveEnd"),
        ("issued", "issued"),
    ] {
        if let Some(value) = notam.get(source).and_then(Value::as_str) {
            out.insert(target.to_string(), json!(value));
        }
    }
    if let Some(summary) = translation.and_then(|t| t.get("simpleText").and_then(Value::as_str)) {
        out.insert("summary".to_string(), json!(summary));
    }
    Some(Value::Object(out))
}

/// Expired notices are dropped; an absent or unparseable end time (e.g.
/// "PERM") keeps the notice.
fn is_active(item: &Value) -> bool {
    let Some(end) = item.get("validTo").and_then(Value::as_str) else {
        return true;
    };
    match parse_timestamp(end) {
        Some(end) => end > Utc::now(),
        None => true,
    }
}

fn sort_key(item: &Value) -> (u8, Reverse<Option<DateTime<Utc>>>) {
    (tier(item), Reverse(recency(item)))
}

/// Closures outrank surface condition reports, which outrank friction
/// reports; everything else trails.
fn tier(item: &Value) -> u8 {
    let mut text = String::new();
    for field in ["body", "summary"] {
        if let Some(s) = item.get(field).and_then(Value::as_str) {
            text.push_str(&s.to_uppercase());
            text.push(' ');
        }
    }
    if text.contains("CLSD") || text.contains("CLOSED") {
        0
    } else if text.contains("RSC") {
        1
    } else if text.contains("CRFI") {
        2
    } else {
        3
    }
}

/// Newest-first tiebreak within a tier. Undated notices sort last: `Reverse`
/// puts `None` after every `Some`.
fn recency(item: &Value) -> Option<DateTime<Utc>> {
    ["validFrom", "issued"]
        .iter()
        .find_map(|field| item.get(*field).and_then(Value::as_str).and_then(parse_timestamp))
}
