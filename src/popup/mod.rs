//! Popup view model
//!
//! Reads the cache directly, listens to its change stream for live updates
//! and talks to the refresh service only through [`RefreshHandle`].

pub mod time_format;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::i18n::{Catalog, MessageId};
use crate::icon::{FlagAssets, FlagDisplay};
use crate::location::{ErrorState, LocationRecord, UNKNOWN_FIELD};
use crate::refresh::RefreshHandle;
use crate::storage::{CacheChange, LocationCache, KEY_IP_INFO};

pub use time_format::format_relative;

pub const PARTIAL_WARNING: &str = "⚠️";
const EMPTY_FIELD: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationDetails {
    pub flag: FlagDisplay,
    pub flag_alt: String,
    pub country: String,
    /// Shown next to the country when some location fields are missing
    pub partial_warning: Option<String>,
    pub country_code: String,
    pub ip: String,
    pub city: String,
    pub region: String,
    pub last_update: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum PopupState {
    Loading { message: String },
    Details(LocationDetails),
    Error { message: String },
}

impl PopupState {
    pub fn details(&self) -> Option<&LocationDetails> {
        match self {
            PopupState::Details(details) => Some(details),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            PopupState::Error { message } => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldLabels {
    pub ip_address: String,
    pub city: String,
    pub region: String,
    pub last_update: String,
    /// Shown by the window while a refresh it started is in flight
    pub loading: String,
}

impl FieldLabels {
    pub fn new(catalog: &Catalog) -> Self {
        Self {
            ip_address: catalog.text(MessageId::IpAddress),
            city: catalog.text(MessageId::City),
            region: catalog.text(MessageId::Region),
            last_update: catalog.text(MessageId::LastUpdate),
            loading: catalog.text(MessageId::Loading),
        }
    }
}

/// Everything the popup window draws
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopupSnapshot {
    pub title: String,
    pub refresh_label: String,
    pub refresh_enabled: bool,
    pub labels: FieldLabels,
    #[serde(flatten)]
    pub state: PopupState,
}

pub struct PopupView {
    cache: LocationCache,
    refresh: RefreshHandle,
    catalog: Arc<Catalog>,
    assets: FlagAssets,
    settle_delay: Duration,
    changes: broadcast::Receiver<CacheChange>,
    state: PopupState,
    refresh_enabled: bool,
}

impl PopupView {
    pub fn new(
        cache: LocationCache,
        refresh: RefreshHandle,
        catalog: Arc<Catalog>,
        assets: FlagAssets,
        settle_delay: Duration,
    ) -> Self {
        let changes = cache.subscribe();
        let state = PopupState::Loading {
            message: catalog.text(MessageId::Loading),
        };
        Self {
            cache,
            refresh,
            catalog,
            assets,
            settle_delay,
            changes,
            state,
            refresh_enabled: true,
        }
    }

    pub fn state(&self) -> &PopupState {
        &self.state
    }

    pub fn refresh_enabled(&self) -> bool {
        self.refresh_enabled
    }

    pub fn snapshot(&self) -> PopupSnapshot {
        PopupSnapshot {
            title: self.catalog.text(MessageId::AppName),
            refresh_label: self.catalog.text(MessageId::Refresh),
            refresh_enabled: self.refresh_enabled,
            labels: FieldLabels::new(&self.catalog),
            state: self.state.clone(),
        }
    }

    /// Show what the cache holds. With nothing cached, ask for a refresh and
    /// stay in the loading state until the change notification arrives.
    pub async fn open(&mut self) -> &PopupState {
        if self.load_from_cache().await {
            return &self.state;
        }

        self.show_loading();
        if let Err(err) = self.refresh.request_refresh().await {
            tracing::warn!("Initial refresh request failed: {}", err);
            self.show_error(self.catalog.text(MessageId::ErrorMessage));
        }
        &self.state
    }

    /// Wait for the next cache change that affects the view.
    /// Returns `None` once the cache is gone.
    pub async fn next_change(&mut self) -> Option<&PopupState> {
        loop {
            match self.changes.recv().await {
                Ok(change) => {
                    if self.apply_change(&change) {
                        return Some(&self.state);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Popup missed {} cache changes, reloading", skipped);
                    if self.load_from_cache().await {
                        return Some(&self.state);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Apply one change notification; true if the view changed
    pub fn apply_change(&mut self, change: &CacheChange) -> bool {
        if let Some(location) = change.new_location() {
            let last_update = change.new_last_update().unwrap_or_else(Utc::now);
            self.show_location(&location, Some(last_update));
            return true;
        }

        let location_removed = change
            .get(KEY_IP_INFO)
            .map_or(true, |c| c.new_value.is_none());
        match change.new_error_state() {
            Some(error_state) if location_removed => {
                self.show_error(error_message(&self.catalog, error_state));
                true
            }
            _ => false,
        }
    }

    /// Refresh button: disable, show loading, request, give the write time
    /// to settle, re-read, re-enable. A failed request shows "refresh failed".
    pub async fn on_refresh_clicked(&mut self) -> &PopupState {
        self.refresh_enabled = false;
        self.show_loading();

        match self.refresh.request_refresh().await {
            Ok(ack) if ack.success => {
                tokio::time::sleep(self.settle_delay).await;
                if !self.load_from_cache().await {
                    self.show_error(self.catalog.text(MessageId::ErrorMessage));
                }
            }
            Ok(_) => {
                tracing::warn!("Refresh was not stored");
                self.show_error(self.catalog.text(MessageId::RefreshFailed));
            }
            Err(err) => {
                tracing::warn!("Refresh request failed: {}", err);
                self.show_error(self.catalog.text(MessageId::RefreshFailed));
            }
        }

        self.refresh_enabled = true;
        &self.state
    }

    /// Render the cached entry; false when nothing is cached
    async fn load_from_cache(&mut self) -> bool {
        let entry = self.cache.read_entry().await;
        if let Some(location) = entry.location {
            self.show_location(&location, entry.last_update);
            true
        } else if let Some(error_state) = entry.error_state {
            self.show_error(error_message(&self.catalog, error_state));
            true
        } else {
            false
        }
    }

    fn show_loading(&mut self) {
        self.state = PopupState::Loading {
            message: self.catalog.text(MessageId::Loading),
        };
    }

    fn show_error(&mut self, message: String) {
        self.state = PopupState::Error { message };
    }

    fn show_location(&mut self, location: &LocationRecord, last_update: Option<DateTime<Utc>>) {
        self.state = PopupState::Details(location_details(
            location,
            last_update,
            Utc::now(),
            &self.catalog,
            &self.assets,
        ));
    }
}

pub fn location_details(
    location: &LocationRecord,
    last_update: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    catalog: &Catalog,
    assets: &FlagAssets,
) -> LocationDetails {
    let code = location.country_code();
    let flag_alt = if code.is_some() {
        catalog.text(MessageId::CountryFlag)
    } else {
        catalog.text(MessageId::UnknownLocation)
    };
    let country = if location.has_known_country() {
        location.country().to_string()
    } else {
        catalog.text(MessageId::UnknownLocation)
    };

    LocationDetails {
        flag: assets.popup_flag(code),
        flag_alt,
        country,
        partial_warning: location
            .is_partial_data()
            .then(|| PARTIAL_WARNING.to_string()),
        country_code: field(code),
        ip: field(Some(location.ip())),
        city: field(Some(location.city())),
        region: field(Some(location.region())),
        last_update: last_update
            .map(|at| format_relative(at, now, catalog))
            .unwrap_or_else(|| EMPTY_FIELD.to_string()),
    }
}

pub fn error_message(catalog: &Catalog, error_state: ErrorState) -> String {
    match error_state {
        ErrorState::NetworkError => catalog.text(MessageId::NetworkError),
        ErrorState::ApiError => catalog.text(MessageId::ApiError),
    }
}

fn field(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() && v != UNKNOWN_FIELD => v.to_string(),
        _ => EMPTY_FIELD.to_string(),
    }
}
