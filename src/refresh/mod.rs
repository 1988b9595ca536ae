//! Refresh cycle: fetch the location, store it, redraw the icon and tooltip

mod service;

pub use service::{spawn_service, spawn_timer, DeliveryError, RefreshAck, RefreshHandle};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::i18n::{Catalog, MessageId};
use crate::icon::{IconRenderer, IconRequest, RenderTier};
use crate::location::{ErrorState, LocationProvider, LocationRecord};
use crate::storage::{CacheEntry, CacheError, LocationCache, WriteOutcome};

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Failed to store refresh result: {0}")]
    Cache(#[from] CacheError),
}

/// What started a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Install,
    Startup,
    /// Tray icon click; only refreshes stale data
    Click,
    Timer,
    /// Explicit request from the popup
    Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Success { partial: bool },
    Failure { error_state: ErrorState },
    /// A later cycle had already stored its result
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub cycle: u64,
    pub outcome: CycleOutcome,
    pub tier: Option<RenderTier>,
}

pub struct RefreshCoordinator {
    provider: Arc<dyn LocationProvider>,
    cache: LocationCache,
    icons: IconRenderer,
    catalog: Arc<Catalog>,
    staleness: chrono::Duration,
    next_cycle: AtomicU64,
}

impl RefreshCoordinator {
    pub async fn new(
        provider: Arc<dyn LocationProvider>,
        cache: LocationCache,
        icons: IconRenderer,
        catalog: Arc<Catalog>,
        staleness: chrono::Duration,
    ) -> Self {
        let next_cycle = cache.stored_cycle().await + 1;
        Self {
            provider,
            cache,
            icons,
            catalog,
            staleness,
            next_cycle: AtomicU64::new(next_cycle),
        }
    }

    pub fn cache(&self) -> &LocationCache {
        &self.cache
    }

    /// Install on first run (nothing cached yet), startup otherwise
    pub async fn launch_trigger(&self) -> Trigger {
        if self.cache.last_update().await.is_none() {
            Trigger::Install
        } else {
            Trigger::Startup
        }
    }

    /// One fetch-store-render pass. Fetch failures are recorded, not returned.
    pub async fn refresh_cycle(&self) -> Result<CycleReport, RefreshError> {
        let cycle = self.next_cycle.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        tracing::debug!(
            "Refresh cycle {} fetching from {}",
            cycle,
            self.provider.name()
        );

        let (entry, request, tooltip, outcome) = match self.provider.fetch_location().await {
            Ok(location) => {
                let request =
                    IconRequest::location(location.country_code(), location.is_partial_data());
                let tooltip = success_tooltip(&self.catalog, &location);
                let outcome = CycleOutcome::Success {
                    partial: location.is_partial_data(),
                };
                (CacheEntry::success(location, now), request, tooltip, outcome)
            }
            Err(err) => {
                tracing::warn!("Location lookup failed: {}", err);
                let error_state = err.error_state();
                (
                    CacheEntry::failure(error_state, now),
                    IconRequest::failure(),
                    failure_tooltip(&self.catalog),
                    CycleOutcome::Failure { error_state },
                )
            }
        };

        if let WriteOutcome::Superseded { stored_cycle } =
            self.cache.write_entry(&entry, cycle).await?
        {
            self.next_cycle.fetch_max(stored_cycle + 1, Ordering::SeqCst);
            tracing::warn!(
                "Dropping result of cycle {}: cycle {} already stored",
                cycle,
                stored_cycle
            );
            return Ok(CycleReport {
                cycle,
                outcome: CycleOutcome::Superseded,
                tier: None,
            });
        }

        let tier = self.icons.update(&request);
        self.icons.set_tooltip(&tooltip);
        tracing::info!("Refresh cycle {} finished: {:?}", cycle, outcome);

        Ok(CycleReport {
            cycle,
            outcome,
            tier,
        })
    }

    /// Refresh only when the last update is older than the staleness threshold
    pub async fn handle_click(&self) -> Result<Option<CycleReport>, RefreshError> {
        self.handle_click_at(Utc::now()).await
    }

    /// [`handle_click`](Self::handle_click) with the click time given
    pub async fn handle_click_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<CycleReport>, RefreshError> {
        if let Some(last_update) = self.cache.last_update().await {
            let age = now.signed_duration_since(last_update);
            if age <= self.staleness {
                tracing::debug!("Click ignored, data is {}s old", age.num_seconds());
                return Ok(None);
            }
        }
        self.refresh_cycle().await.map(Some)
    }

    pub async fn handle_trigger(
        &self,
        trigger: Trigger,
    ) -> Result<Option<CycleReport>, RefreshError> {
        tracing::debug!("Handling trigger {:?}", trigger);
        match trigger {
            Trigger::Click => self.handle_click().await,
            _ => self.refresh_cycle().await.map(Some),
        }
    }

    /// Redraw the icon from whatever is cached, before any fetch completes
    pub async fn restore_icon(&self) -> Option<RenderTier> {
        let location = self.cache.read_entry().await.location?;
        let code = location.country_code()?;
        self.icons
            .update(&IconRequest::location(Some(code), location.is_partial_data()))
    }
}

pub fn success_tooltip(catalog: &Catalog, location: &LocationRecord) -> String {
    let mut text = format!(
        "{}\nIP: {}",
        catalog.text(MessageId::ViewIpInfo),
        location.ip()
    );
    if location.has_known_country() {
        text.push_str(&format!(
            "\n{}: {}",
            catalog.text(MessageId::CountryLabel),
            location.country()
        ));
    }
    if location.is_partial_data() {
        text.push_str(&format!("\n⚠️ {}", catalog.text(MessageId::PartialData)));
    }
    text
}

pub fn failure_tooltip(catalog: &Catalog) -> String {
    format!(
        "{}\n❌ {}",
        catalog.text(MessageId::AppName),
        catalog.text(MessageId::LocationUnavailable)
    )
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::icon::testing::{asset_dir, RecordingSurface};
    use crate::icon::{Badge, FlagAssets, BADGE_ERROR, BADGE_PARTIAL};
    use crate::location::FetchError;
    use crate::storage::KEY_LAST_UPDATE;
    use std::collections::BTreeMap;

    struct Harness {
        coordinator: RefreshCoordinator,
        provider: Arc<ScriptedProvider>,
        surface: Arc<RecordingSurface>,
        _assets: tempfile::TempDir,
    }

    async fn harness(provider: ScriptedProvider) -> Harness {
        let assets = asset_dir(&["fr"], true, true);
        let surface = Arc::new(RecordingSurface::default());
        let provider = Arc::new(provider);
        let coordinator = RefreshCoordinator::new(
            provider.clone(),
            LocationCache::in_memory(),
            IconRenderer::new(FlagAssets::new(assets.path()), surface.clone()),
            Arc::new(Catalog::fallback_only()),
            chrono::Duration::minutes(5),
        )
        .await;
        Harness {
            coordinator,
            provider,
            surface,
            _assets: assets,
        }
    }

    fn clicked_at() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    async fn set_last_update(cache: &LocationCache, at: DateTime<Utc>) {
        cache
            .set(BTreeMap::from([(
                KEY_LAST_UPDATE.to_string(),
                serde_json::Value::from(at.timestamp_millis()),
            )]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn success_stores_whole_entry_and_draws_flag() {
        let h = harness(ScriptedProvider::new(vec![], france_ok)).await;

        let report = h.coordinator.refresh_cycle().await.unwrap();

        assert_eq!(report.outcome, CycleOutcome::Success { partial: false });
        assert_eq!(report.tier, Some(RenderTier::DirectFlag));
        let entry = h.coordinator.cache().read_entry().await;
        assert_eq!(entry.location, Some(france()));
        assert!(entry.last_update.is_some());
        assert_eq!(entry.error_state, None);
        assert_eq!(h.surface.last_badge(), Some(None));
        assert_eq!(
            h.surface.last_tooltip().as_deref(),
            Some("Where am I - View your location\nIP: 1.2.3.4\nCountry: France")
        );
    }

    #[tokio::test]
    async fn partial_result_gets_warning_badge_and_tooltip() {
        let h = harness(ScriptedProvider::new(vec![Ok(ip_only())], france_ok)).await;

        let report = h.coordinator.refresh_cycle().await.unwrap();

        assert_eq!(report.outcome, CycleOutcome::Success { partial: true });
        assert_eq!(report.tier, Some(RenderTier::UnknownLocation));
        let tooltip = h.surface.last_tooltip().unwrap();
        assert!(tooltip.ends_with("\n⚠️ Partial location data"));
        assert!(!tooltip.contains("Country:"));
    }

    #[tokio::test]
    async fn partial_result_with_code_shows_amber_bang() {
        fn fr_without_name() -> Scripted {
            Ok(LocationRecord::new("5.6.7.8", None, Some("FR".into()), None, None))
        }
        let h = harness(ScriptedProvider::new(vec![], fr_without_name)).await;

        h.coordinator.refresh_cycle().await.unwrap();

        assert_eq!(
            h.surface.last_badge(),
            Some(Some(Badge::new("!", BADGE_PARTIAL)))
        );
    }

    #[tokio::test]
    async fn failure_replaces_previous_location() {
        let h = harness(ScriptedProvider::new(vec![Ok(france())], offline)).await;
        h.coordinator.refresh_cycle().await.unwrap();

        let report = h.coordinator.refresh_cycle().await.unwrap();

        assert_eq!(
            report.outcome,
            CycleOutcome::Failure {
                error_state: ErrorState::NetworkError
            }
        );
        let entry = h.coordinator.cache().read_entry().await;
        assert_eq!(entry.location, None);
        assert_eq!(entry.error_state, Some(ErrorState::NetworkError));
        assert!(entry.last_update.is_some());
        assert_eq!(
            h.surface.last_badge(),
            Some(Some(Badge::new("!", BADGE_ERROR)))
        );
        assert_eq!(
            h.surface.last_tooltip().as_deref(),
            Some("Where am I\n❌ Unable to get location data")
        );
    }

    #[tokio::test]
    async fn click_at_exactly_five_minutes_does_not_fetch() {
        let h = harness(ScriptedProvider::new(vec![], france_ok)).await;
        let now = clicked_at();
        set_last_update(h.coordinator.cache(), now - chrono::Duration::minutes(5)).await;

        let report = h.coordinator.handle_click_at(now).await.unwrap();

        assert!(report.is_none());
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn click_with_fresh_data_does_not_fetch() {
        let h = harness(ScriptedProvider::new(vec![], france_ok)).await;
        let now = clicked_at();
        set_last_update(h.coordinator.cache(), now - chrono::Duration::seconds(30)).await;

        assert!(h.coordinator.handle_click_at(now).await.unwrap().is_none());
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn click_just_past_five_minutes_fetches_once() {
        let h = harness(ScriptedProvider::new(vec![], france_ok)).await;
        let now = clicked_at();
        let stale = now - chrono::Duration::minutes(5) - chrono::Duration::milliseconds(1);
        set_last_update(h.coordinator.cache(), stale).await;

        let report = h.coordinator.handle_click_at(now).await.unwrap();

        assert!(report.is_some());
        assert_eq!(h.provider.calls(), 1);
    }

    #[tokio::test]
    async fn embedded_api_error_is_stored_as_network_error() {
        fn rate_limited() -> Scripted {
            Err(FetchError::Api("RateLimited".into()))
        }
        let h = harness(ScriptedProvider::new(vec![], rate_limited)).await;

        let report = h.coordinator.refresh_cycle().await.unwrap();

        assert_eq!(
            report.outcome,
            CycleOutcome::Failure {
                error_state: ErrorState::NetworkError
            }
        );
        let entry = h.coordinator.cache().read_entry().await;
        assert_eq!(entry.location, None);
        assert_eq!(entry.error_state, Some(ErrorState::NetworkError));
    }

    #[tokio::test]
    async fn click_with_empty_cache_fetches() {
        let h = harness(ScriptedProvider::new(vec![], france_ok)).await;
        assert!(h.coordinator.handle_trigger(Trigger::Click).await.unwrap().is_some());
        assert_eq!(h.provider.calls(), 1);
    }

    #[tokio::test]
    async fn launch_trigger_depends_on_cache() {
        let h = harness(ScriptedProvider::new(vec![], france_ok)).await;
        assert_eq!(h.coordinator.launch_trigger().await, Trigger::Install);
        h.coordinator.refresh_cycle().await.unwrap();
        assert_eq!(h.coordinator.launch_trigger().await, Trigger::Startup);
    }

    #[tokio::test]
    async fn restore_icon_uses_cached_code() {
        let h = harness(ScriptedProvider::new(vec![], france_ok)).await;
        assert_eq!(h.coordinator.restore_icon().await, None);

        h.coordinator.refresh_cycle().await.unwrap();
        assert_eq!(
            h.coordinator.restore_icon().await,
            Some(RenderTier::DirectFlag)
        );
        assert_eq!(h.provider.calls(), 1);
    }

    #[tokio::test]
    async fn cycle_ids_continue_after_stored_one() {
        let cache = LocationCache::in_memory();
        cache
            .write_entry(&CacheEntry::success(france(), Utc::now()), 41)
            .await
            .unwrap();
        let assets = asset_dir(&[], true, true);
        let coordinator = RefreshCoordinator::new(
            Arc::new(ScriptedProvider::new(vec![], offline)),
            cache,
            IconRenderer::new(
                FlagAssets::new(assets.path()),
                Arc::new(RecordingSurface::default()),
            ),
            Arc::new(Catalog::fallback_only()),
            chrono::Duration::minutes(5),
        )
        .await;

        let report = coordinator.refresh_cycle().await.unwrap();
        assert_eq!(report.cycle, 42);
        assert!(matches!(report.outcome, CycleOutcome::Failure { .. }));
    }

    #[tokio::test]
    async fn cycle_ids_catch_up_with_another_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let assets = asset_dir(&["fr"], true, true);
        let coordinator = RefreshCoordinator::new(
            Arc::new(ScriptedProvider::new(vec![], france_ok)),
            LocationCache::open(&path).await.unwrap(),
            IconRenderer::new(
                FlagAssets::new(assets.path()),
                Arc::new(RecordingSurface::default()),
            ),
            Arc::new(Catalog::fallback_only()),
            chrono::Duration::minutes(5),
        )
        .await;

        LocationCache::open(&path)
            .await
            .unwrap()
            .write_entry(&CacheEntry::success(france(), Utc::now()), 10)
            .await
            .unwrap();

        let dropped = coordinator.refresh_cycle().await.unwrap();
        assert_eq!(dropped.outcome, CycleOutcome::Superseded);

        let next = coordinator.refresh_cycle().await.unwrap();
        assert_eq!(next.cycle, 11);
        assert_eq!(next.outcome, CycleOutcome::Success { partial: false });
    }

    #[tokio::test]
    async fn overlapping_cycles_keep_the_newest_result() {
        let h = harness(
            ScriptedProvider::new(vec![Ok(ip_only()), Ok(france())], france_ok)
                .with_delay(std::time::Duration::from_millis(20)),
        )
        .await;

        // Both cycles take their ids before either finishes
        let (first, second) = tokio::join!(
            h.coordinator.refresh_cycle(),
            h.coordinator.refresh_cycle()
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(first.cycle < second.cycle);
        assert_eq!(h.coordinator.cache().stored_cycle().await, second.cycle);
    }
}
