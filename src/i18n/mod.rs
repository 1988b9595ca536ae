//! Localized user-visible strings
//!
//! Catalogs are Fluent files embedded from `assets/i18n/`. Every message has
//! a hardcoded English fallback, used when the active catalog lacks the key
//! or fails to format it.

use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource};
use rust_embed::RustEmbed;
use unic_langid::LanguageIdentifier;

#[derive(RustEmbed)]
#[folder = "assets/i18n/"]
struct Locales;

pub const DEFAULT_LOCALE: &str = "en-US";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    AppName,
    ViewIpInfo,
    CountryLabel,
    PartialData,
    LocationUnavailable,
    NetworkError,
    ApiError,
    ErrorMessage,
    RefreshFailed,
    UnknownLocation,
    CountryFlag,
    Loading,
    Refresh,
    IpAddress,
    City,
    Region,
    LastUpdate,
    TimeJustNow,
    TimeMinutesAgo,
    TimeHoursAgo,
    DateFormat,
}

impl MessageId {
    pub fn key(&self) -> &'static str {
        match self {
            MessageId::AppName => "app-name",
            MessageId::ViewIpInfo => "view-ip-info",
            MessageId::CountryLabel => "country-label",
            MessageId::PartialData => "partial-data",
            MessageId::LocationUnavailable => "location-unavailable",
            MessageId::NetworkError => "network-error",
            MessageId::ApiError => "api-error",
            MessageId::ErrorMessage => "error-message",
            MessageId::RefreshFailed => "refresh-failed",
            MessageId::UnknownLocation => "unknown-location",
            MessageId::CountryFlag => "country-flag",
            MessageId::Loading => "loading",
            MessageId::Refresh => "refresh",
            MessageId::IpAddress => "ip-address",
            MessageId::City => "city",
            MessageId::Region => "region",
            MessageId::LastUpdate => "last-update",
            MessageId::TimeJustNow => "time-just-now",
            MessageId::TimeMinutesAgo => "time-minutes-ago",
            MessageId::TimeHoursAgo => "time-hours-ago",
            MessageId::DateFormat => "date-format",
        }
    }

    fn fallback(&self) -> &'static str {
        match self {
            MessageId::AppName => "Where am I",
            MessageId::ViewIpInfo => "Where am I - View your location",
            MessageId::CountryLabel => "Country",
            MessageId::PartialData => "Partial location data",
            MessageId::LocationUnavailable => "Unable to get location data",
            MessageId::NetworkError => {
                "Network connection failed. Please check your internet connection."
            }
            MessageId::ApiError => {
                "Location service temporarily unavailable. Please try again later."
            }
            MessageId::ErrorMessage => "Unable to get location information.",
            MessageId::RefreshFailed => "Refresh failed. Please try again.",
            MessageId::UnknownLocation => "Unknown Location",
            MessageId::CountryFlag => "Country flag",
            MessageId::Loading => "Getting your location...",
            MessageId::Refresh => "Refresh",
            MessageId::IpAddress => "IP Address",
            MessageId::City => "City",
            MessageId::Region => "Region",
            MessageId::LastUpdate => "Last updated",
            MessageId::TimeJustNow => "just now",
            MessageId::TimeMinutesAgo => "minutes ago",
            MessageId::TimeHoursAgo => "hours ago",
            MessageId::DateFormat => "%b %-d, %H:%M",
        }
    }
}

pub struct Catalog {
    bundle: Option<FluentBundle<FluentResource>>,
    locale: LanguageIdentifier,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Catalog {
    /// Catalog for `requested`, else the system locale, else English
    pub fn new(requested: Option<&str>) -> Self {
        let available = available_locales();
        let locale = resolve_locale(requested, sys_locale::get_locale().as_deref(), &available)
            .unwrap_or_else(default_locale);
        Self::for_locale(locale)
    }

    fn for_locale(locale: LanguageIdentifier) -> Self {
        let bundle = load_bundle(&locale);
        if bundle.is_none() {
            tracing::warn!("No message catalog for {}, using built-in English", locale);
        }
        Self { bundle, locale }
    }

    /// Built-in English strings only
    pub fn fallback_only() -> Self {
        Self {
            bundle: None,
            locale: default_locale(),
        }
    }

    pub fn locale(&self) -> &LanguageIdentifier {
        &self.locale
    }

    /// Catalog entry for `id`, if the active catalog has one
    pub fn lookup(&self, id: MessageId, args: Option<&FluentArgs>) -> Option<String> {
        let bundle = self.bundle.as_ref()?;
        let pattern = bundle.get_message(id.key())?.value()?;
        let mut errors = vec![];
        let value = bundle.format_pattern(pattern, args, &mut errors);
        if errors.is_empty() {
            Some(value.into_owned())
        } else {
            tracing::debug!("Formatting {} failed: {:?}", id.key(), errors);
            None
        }
    }

    pub fn text(&self, id: MessageId) -> String {
        self.lookup(id, None)
            .unwrap_or_else(|| id.fallback().to_string())
    }

    /// Message taking a `$count` argument
    pub fn count(&self, id: MessageId, count: i64) -> String {
        let mut args = FluentArgs::new();
        args.set("count", count);
        self.lookup(id, Some(&args))
            .unwrap_or_else(|| english_count(id, count))
    }
}

fn english_count(id: MessageId, count: i64) -> String {
    match (id, count) {
        (MessageId::TimeMinutesAgo, 1) => "1 minute ago".to_string(),
        (MessageId::TimeHoursAgo, 1) => "1 hour ago".to_string(),
        _ => format!("{} {}", count, id.fallback()),
    }
}

fn default_locale() -> LanguageIdentifier {
    DEFAULT_LOCALE.parse().unwrap_or_default()
}

pub fn available_locales() -> Vec<LanguageIdentifier> {
    Locales::iter()
        .filter_map(|file| {
            file.as_ref()
                .strip_suffix(".ftl")
                .and_then(|name| name.parse::<LanguageIdentifier>().ok())
        })
        .collect()
}

fn load_bundle(locale: &LanguageIdentifier) -> Option<FluentBundle<FluentResource>> {
    let file = Locales::get(&format!("{locale}.ftl"))?;
    let source = String::from_utf8_lossy(file.data.as_ref()).to_string();
    let resource = match FluentResource::try_new(source) {
        Ok(resource) => resource,
        Err((resource, errors)) => {
            tracing::warn!("Catalog {} has {} syntax errors", locale, errors.len());
            resource
        }
    };

    let mut bundle = FluentBundle::new_concurrent(vec![locale.clone()]);
    bundle.set_use_isolating(false);
    if let Err(errors) = bundle.add_resource(resource) {
        tracing::warn!("Catalog {} has {} duplicate entries", locale, errors.len());
    }
    Some(bundle)
}

/// Pick the best available locale: the requested one, then the system one.
/// A bare language (`fr`, `zh-TW`) matches any catalog with that language.
fn resolve_locale(
    requested: Option<&str>,
    system: Option<&str>,
    available: &[LanguageIdentifier],
) -> Option<LanguageIdentifier> {
    [requested, system]
        .into_iter()
        .flatten()
        .filter_map(|tag| tag.replace('_', "-").parse::<LanguageIdentifier>().ok())
        .find_map(|wanted| {
            available
                .iter()
                .find(|candidate| **candidate == wanted)
                .or_else(|| {
                    available
                        .iter()
                        .find(|candidate| candidate.language == wanted.language)
                })
                .cloned()
        })
}
