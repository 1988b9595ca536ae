//! Application settings
//!
//! Read from `settings.json` in the data directory, then overridden by
//! `WHEREAMI_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::location::DEFAULT_API_URL;

pub const APP_DIR_NAME: &str = "WhereAmI";
const SETTINGS_FILENAME: &str = "settings.json";
const CACHE_FILENAME: &str = "cache.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid API URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Could not determine data directory")]
    NoDataDir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub api_url: String,
    pub refresh_interval_minutes: u64,
    pub staleness_minutes: u64,
    pub settle_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub assets_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub language: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            refresh_interval_minutes: 30,
            staleness_minutes: 5,
            settle_delay_ms: 1000,
            request_timeout_secs: 30,
            assets_dir: None,
            data_dir: None,
            language: None,
        }
    }
}

impl AppSettings {
    /// Settings file from the default data directory plus environment
    pub fn load() -> Result<Self, ConfigError> {
        let data_dir = env_value("WHEREAMI_DATA_DIR")
            .map(PathBuf::from)
            .or_else(default_data_dir)
            .ok_or(ConfigError::NoDataDir)?;
        let mut settings = Self::load_from_path(&data_dir.join(SETTINGS_FILENAME));
        settings.data_dir.get_or_insert(data_dir);
        settings.apply_env(env_value);
        settings.validate()?;
        Ok(settings)
    }

    /// Missing or malformed files give the defaults
    pub fn load_from_path(path: &Path) -> Self {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!("Ignoring malformed settings {}: {}", path.display(), err);
                Self::default()
            }
        }
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("WHEREAMI_API_URL") {
            self.api_url = url;
        }
        if let Some(minutes) = lookup("WHEREAMI_REFRESH_MINUTES").and_then(|v| v.parse().ok()) {
            self.refresh_interval_minutes = minutes;
        }
        if let Some(dir) = lookup("WHEREAMI_ASSETS_DIR") {
            self.assets_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = lookup("WHEREAMI_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(lang) = lookup("WHEREAMI_LANG") {
            self.language = Some(lang);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.api_url).map_err(|source| ConfigError::InvalidUrl {
            url: self.api_url.clone(),
            source,
        })?;
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes.max(1) * 60)
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.staleness_minutes as i64)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Fall back to `dir` for flags and icons unless a directory is configured.
    /// The desktop host passes its bundled resource directory here.
    pub fn use_assets_dir_if_unset(&mut self, dir: PathBuf) {
        self.assets_dir.get_or_insert(dir);
    }

    /// Source checkout's `icons/` when nothing else is set
    pub fn assets_dir(&self) -> PathBuf {
        self.assets_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/icons")))
    }

    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir.clone().or_else(default_data_dir)
    }

    pub fn cache_path(&self) -> Option<PathBuf> {
        self.data_dir().map(|dir| dir.join(CACHE_FILENAME))
    }
}

fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME))
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_refresh_policy() {
        let settings = AppSettings::default();
        assert_eq!(settings.refresh_interval(), Duration::from_secs(30 * 60));
        assert_eq!(settings.staleness(), chrono::Duration::minutes(5));
        assert_eq!(settings.settle_delay(), Duration::from_secs(1));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"refreshIntervalMinutes": 10, "language": "fr"}"#).unwrap();

        let settings = AppSettings::load_from_path(&path);
        assert_eq!(settings.refresh_interval_minutes, 10);
        assert_eq!(settings.language.as_deref(), Some("fr"));
        assert_eq!(settings.staleness_minutes, 5);
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "refresh = 10").unwrap();
        assert_eq!(AppSettings::load_from_path(&path), AppSettings::default());
    }

    #[test]
    fn env_overrides_file_values() {
        let env = HashMap::from([
            ("WHEREAMI_API_URL", "http://127.0.0.1:9000/json/"),
            ("WHEREAMI_REFRESH_MINUTES", "15"),
            ("WHEREAMI_LANG", "zh-CN"),
        ]);
        let mut settings = AppSettings::default();
        settings.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.api_url, "http://127.0.0.1:9000/json/");
        assert_eq!(settings.refresh_interval_minutes, 15);
        assert_eq!(settings.language.as_deref(), Some("zh-CN"));
    }

    #[test]
    fn invalid_url_is_rejected() {
        let settings = AppSettings {
            api_url: "not a url".to_string(),
            ..AppSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn bundled_assets_dir_only_fills_a_gap() {
        let mut settings = AppSettings::default();
        settings.use_assets_dir_if_unset(PathBuf::from("/opt/whereami/icons"));
        assert_eq!(settings.assets_dir(), PathBuf::from("/opt/whereami/icons"));

        let env = HashMap::from([("WHEREAMI_ASSETS_DIR", "/srv/flags")]);
        let mut settings = AppSettings::default();
        settings.apply_env(|key| env.get(key).map(|v| v.to_string()));
        settings.use_assets_dir_if_unset(PathBuf::from("/opt/whereami/icons"));
        assert_eq!(settings.assets_dir(), PathBuf::from("/srv/flags"));
    }
}
