//! Location lookup: the record type, the provider contract and its errors

mod ipapi;

pub use ipapi::{IpapiProvider, DEFAULT_API_URL};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Country name the lookup reports when it cannot identify one.
pub const UNKNOWN_FIELD: &str = "Unknown";

/// Error kinds persisted next to the cached location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorState {
    NetworkError,
    ApiError,
}

impl ErrorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorState::NetworkError => "network_error",
            ErrorState::ApiError => "api_error",
        }
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP {status}")]
    Status { status: u16 },
    #[error("Malformed response: {0}")]
    Decode(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("No IP data received")]
    MissingIp,
}

impl FetchError {
    /// Error kind recorded in the cache for this failure. Every failed
    /// lookup is stored as a network error; the variant only shows in logs.
    pub fn error_state(&self) -> ErrorState {
        ErrorState::NetworkError
    }
}

/// One successful lookup result.
///
/// Fields are fixed at construction; `is_partial_data` is derived from the
/// country fields and recomputed whenever a stored record is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredLocation")]
pub struct LocationRecord {
    ip: String,
    country: String,
    country_code: Option<String>,
    city: String,
    region: String,
    is_partial_data: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredLocation {
    ip: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
}

impl From<StoredLocation> for LocationRecord {
    fn from(stored: StoredLocation) -> Self {
        LocationRecord::new(
            stored.ip,
            stored.country,
            stored.country_code,
            stored.city,
            stored.region,
        )
    }
}

impl LocationRecord {
    pub fn new(
        ip: impl Into<String>,
        country: Option<String>,
        country_code: Option<String>,
        city: Option<String>,
        region: Option<String>,
    ) -> Self {
        let country = non_empty(country).filter(|name| name != UNKNOWN_FIELD);
        let country_code = non_empty(country_code);
        let is_partial_data = country.is_none() || country_code.is_none();

        Self {
            ip: ip.into(),
            country: country.unwrap_or_else(|| UNKNOWN_FIELD.to_string()),
            country_code,
            city: non_empty(city).unwrap_or_else(|| UNKNOWN_FIELD.to_string()),
            region: non_empty(region).unwrap_or_else(|| UNKNOWN_FIELD.to_string()),
            is_partial_data,
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Country name, `"Unknown"` when the lookup had none
    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn has_known_country(&self) -> bool {
        self.country != UNKNOWN_FIELD
    }

    pub fn country_code(&self) -> Option<&str> {
        self.country_code.as_deref()
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn is_partial_data(&self) -> bool {
        self.is_partial_data
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Source of "what is my public IP and where is it"
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Single lookup attempt; no retries
    async fn fetch_location(&self) -> Result<LocationRecord, FetchError>;

    /// Provider name for logs
    fn name(&self) -> &'static str;
}
