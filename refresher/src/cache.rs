use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::icao::Icao;
use shared::notam::NotamRecord;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// On-disk shape of the cache file. The snapshot (codes + records) and the
/// named code sets live in the same file but have independent lifetimes:
/// clearing the snapshot must never lose a saved set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedState {
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub codes: Vec<Icao>,
    #[serde(default)]
    pub sets: BTreeMap<String, Vec<Icao>>,
    #[serde(default)]
    pub records: HashMap<Icao, Vec<NotamRecord>>,
}

pub struct DiskCache {
    path: PathBuf,
    freshness: chrono::Duration,
}

impl DiskCache {
    pub fn new(path: impl Into<PathBuf>, freshness: chrono::Duration) -> Self {
        Self {
            path: path.into(),
            freshness,
        }
    }

    /// Read the cache file, tolerating absence and corruption. A file that
    /// fails to parse is treated as missing.
    pub fn load(&self) -> Option<CachedState> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read cache file");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "discarding unreadable cache file");
                None
            }
        }
    }

    /// Like [`load`](Self::load), but only when the snapshot was written
    /// within the freshness window. Stale snapshots are not returned; the
    /// caller fetches from scratch instead.
    pub fn load_fresh(&self) -> Option<CachedState> {
        let state = self.load()?;
        let saved_at = state.saved_at?;
        let age = Utc::now() - saved_at;
        if age > self.freshness {
            debug!(age_seconds = age.num_seconds(), "disk cache is stale, ignoring");
            return None;
        }
        Some(state)
    }

    /// Overwrite the snapshot portion, preserving named sets already on disk.
    pub fn save_snapshot(
        &self,
        codes: &[Icao],
        records: &HashMap<Icao, Vec<NotamRecord>>,
    ) -> Result<(), CacheError> {
        let mut state = self.load().unwrap_or_default();
        state.saved_at = Some(Utc::now());
        state.codes = codes.to_vec();
        state.records = records.clone();
        self.write(&state)
    }

    /// Drop the snapshot but keep named sets.
    pub fn clear_snapshot(&self) {
        let Some(mut state) = self.load() else { return };
        state.saved_at = None;
        state.codes.clear();
        state.records.clear();
        if let Err(e) = self.write(&state) {
            warn!(error = %e, "failed to clear cache snapshot");
        }
    }

    pub fn save_set(&self, name: &str, codes: Vec<Icao>) -> Result<(), CacheError> {
        let mut state = self.load().unwrap_or_default();
        state.sets.insert(name.to_string(), codes);
        self.write(&state)
    }

    pub fn delete_set(&self, name: &str) -> Result<(), CacheError> {
        let mut state = self.load().unwrap_or_default();
        state.sets.remove(name);
        self.write(&state)
    }

    pub fn recall_set(&self, name: &str) -> Option<Vec<Icao>> {
        self.load()?.sets.get(name).cloned()
    }

    pub fn set_names(&self) -> Vec<String> {
        self.load()
            .map(|state| state.sets.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn write(&self, state: &CachedState) -> Result<(), CacheError> {
        let serialized = serde_json::to_string(state)?;
        fs::write(&self.path, serialized)?;
        Ok(())
    }
}
