use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Four-letter location indicator, stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Icao(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IcaoError {
    #[error("airport code must be exactly 4 letters, got {0:?}")]
    InvalidFormat(String),
}

impl Icao {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// NAV CANADA is the fallback provider for Canadian location indicators.
    pub fn is_canadian(&self) -> bool {
        self.0.starts_with('C')
    }
}

impl FromStr for Icao {
    type Err = IcaoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Icao(trimmed.to_ascii_uppercase()))
        } else {
            Err(IcaoError::InvalidFormat(s.to_string()))
        }
    }
}

impl TryFrom<String> for Icao {
    type Error = IcaoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Icao> for String {
    fn from(value: Icao) -> Self {
        value.0
    }
}

impl fmt::Display for Icao {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
