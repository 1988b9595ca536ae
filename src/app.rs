//! Wiring shared by the tray app and the CLI

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::AppSettings;
use crate::i18n::Catalog;
use crate::icon::{FlagAssets, IconRenderer, IconSurface};
use crate::location::{IpapiProvider, LocationProvider};
use crate::popup::PopupView;
use crate::refresh::{spawn_service, spawn_timer, RefreshCoordinator, RefreshHandle};
use crate::storage::LocationCache;

pub struct AppContext {
    pub settings: AppSettings,
    pub catalog: Arc<Catalog>,
    pub cache: LocationCache,
    pub coordinator: Arc<RefreshCoordinator>,
}

/// Running refresh service plus its timer
pub struct Running {
    pub handle: RefreshHandle,
    pub service: JoinHandle<()>,
    pub timer: Option<JoinHandle<()>>,
}

impl AppContext {
    /// Build everything from `settings`, fetching from the configured API
    pub async fn build(settings: AppSettings, surface: Arc<dyn IconSurface>) -> Result<Self> {
        let provider = IpapiProvider::new(settings.api_url.clone(), settings.request_timeout());
        Self::with_provider(settings, Arc::new(provider), surface).await
    }

    pub async fn with_provider(
        settings: AppSettings,
        provider: Arc<dyn LocationProvider>,
        surface: Arc<dyn IconSurface>,
    ) -> Result<Self> {
        let catalog = Arc::new(Catalog::new(settings.language.as_deref()));
        tracing::debug!("Using {} messages", catalog.locale());

        let cache = match settings.cache_path() {
            Some(path) => LocationCache::open(path.clone())
                .await
                .with_context(|| format!("Failed to open cache at {}", path.display()))?,
            None => {
                tracing::warn!("No data directory, cache will not persist");
                LocationCache::in_memory()
            }
        };

        let icons = IconRenderer::new(FlagAssets::new(settings.assets_dir()), surface);
        let coordinator = RefreshCoordinator::new(
            provider,
            cache.clone(),
            icons,
            catalog.clone(),
            settings.staleness(),
        )
        .await;

        Ok(Self {
            settings,
            catalog,
            cache,
            coordinator: Arc::new(coordinator),
        })
    }

    pub fn assets(&self) -> FlagAssets {
        FlagAssets::new(self.settings.assets_dir())
    }

    /// Start the refresh service without any trigger
    pub fn serve(&self) -> Running {
        let (handle, service) = spawn_service(self.coordinator.clone());
        Running {
            handle,
            service,
            timer: None,
        }
    }

    /// Startup sequence: restore the cached icon, fire the install or
    /// startup trigger, start the periodic timer.
    pub async fn start(&self) -> Result<Running> {
        if let Some(tier) = self.coordinator.restore_icon().await {
            tracing::debug!("Restored cached icon with tier {:?}", tier);
        }

        let mut running = self.serve();
        let trigger = self.coordinator.launch_trigger().await;
        running
            .handle
            .trigger(trigger)
            .await
            .context("Failed to queue launch refresh")?;
        running.timer = Some(spawn_timer(
            running.handle.clone(),
            self.settings.refresh_interval(),
        ));
        tracing::info!(
            "Started ({:?}), refreshing every {} minutes",
            trigger,
            self.settings.refresh_interval_minutes
        );
        Ok(running)
    }

    pub fn popup(&self, handle: RefreshHandle) -> PopupView {
        PopupView::new(
            self.cache.clone(),
            handle,
            self.catalog.clone(),
            self.assets(),
            self.settings.settle_delay(),
        )
    }
}
