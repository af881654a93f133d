use crate::icao::Icao;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One notice for one airport, in the canonical shape both providers
/// normalize into.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotamRecord {
    /// `{code}-{number}`, or `{code}-{index}` when the provider omitted a
    /// notice number. Stable across fetches of unchanged data.
    pub id: String,
    pub code: Icao,
    pub number: Option<String>,
    pub classification: Classification,
    pub valid_from: Option<DateTime<Utc>>,
    /// `None` means open-ended / permanent.
    pub valid_to: Option<DateTime<Utc>>,
    pub issued: Option<DateTime<Utc>>,
    pub summary: String,
    pub body: String,
    pub q_line: Option<String>,
    pub source: Provider,
}

/// Coarse derived category, never taken verbatim from upstream.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    RunwayClosure,
    TaxiwayClosure,
    SurfaceCondition,
    FrictionIndex,
    NavAid,
    Fuel,
    Cancelled,
    Other,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Primary,
    Secondary,
}

/// Per-code fetch state. Exactly one per registered code; transitions are
/// driven only by the scheduler/orchestrator.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Queued,
    Loading,
    Loaded,
    Failed,
}

/// Ephemeral "new notice" decoration, purged after the highlight window.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewNotamMarker {
    pub record_id: String,
    pub detected_at: DateTime<Utc>,
}
