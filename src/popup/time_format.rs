//! "Last updated" text

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Duration, Local, Utc};

use crate::i18n::{Catalog, MessageId};

const FALLBACK_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Relative time for recent timestamps, a local date and time otherwise.
///
/// Under a minute (or in the future) reads "just now", under an hour counts
/// minutes, under a day counts hours.
pub fn format_relative(then: DateTime<Utc>, now: DateTime<Utc>, catalog: &Catalog) -> String {
    let elapsed = now.signed_duration_since(then);
    if elapsed < Duration::minutes(1) {
        catalog.text(MessageId::TimeJustNow)
    } else if elapsed < Duration::hours(1) {
        catalog.count(MessageId::TimeMinutesAgo, elapsed.num_minutes())
    } else if elapsed < Duration::days(1) {
        catalog.count(MessageId::TimeHoursAgo, elapsed.num_hours())
    } else {
        format_absolute(then, catalog)
    }
}

/// Local time in the catalog's `date-format` pattern
pub fn format_absolute(then: DateTime<Utc>, catalog: &Catalog) -> String {
    let pattern = catalog.text(MessageId::DateFormat);
    let mut items: Vec<Item> = StrftimeItems::new(&pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        tracing::debug!("Bad date-format {:?}, using {}", pattern, FALLBACK_DATE_FORMAT);
        items = StrftimeItems::new(FALLBACK_DATE_FORMAT).collect();
    }
    then.with_timezone(&Local)
        .format_with_items(items.iter())
        .to_string()
}
