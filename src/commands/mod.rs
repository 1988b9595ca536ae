//! Tauri IPC commands for the popup frontend

use anyhow::Result;
use std::sync::Arc;
use tauri::{command, AppHandle, Emitter, State};
use tokio::sync::{broadcast, Mutex};

use crate::app::{AppContext, Running};
use crate::config::AppSettings;
use crate::icon::IconSurface;
use crate::popup::{PopupSnapshot, PopupView};
use crate::refresh::Trigger;

pub const LOCATION_UPDATED_EVENT: &str = "location-updated";

/// Managed state behind every command
pub struct DesktopState {
    context: AppContext,
    running: Running,
    popup: Arc<Mutex<PopupView>>,
}

impl DesktopState {
    pub async fn start(settings: AppSettings, surface: Arc<dyn IconSurface>) -> Result<Self> {
        let context = AppContext::build(settings, surface).await?;
        let running = context.start().await?;
        let popup = context.popup(running.handle.clone());
        Ok(Self {
            context,
            running,
            popup: Arc::new(Mutex::new(popup)),
        })
    }

    pub async fn click(&self) -> Result<()> {
        self.running.handle.trigger(Trigger::Click).await?;
        Ok(())
    }
}

/// Forward cache changes to the popup window as `location-updated` events
pub fn forward_changes(app: AppHandle, state: &DesktopState) {
    let mut changes = state.context.cache.subscribe();
    let popup = state.popup.clone();
    tauri::async_runtime::spawn(async move {
        loop {
            let change = match changes.recv().await {
                Ok(change) => change,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} cache changes", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let snapshot = {
                let mut popup = popup.lock().await;
                if !popup.apply_change(&change) {
                    continue;
                }
                popup.snapshot()
            };
            if let Err(e) = app.emit(LOCATION_UPDATED_EVENT, &snapshot) {
                tracing::warn!("Failed to emit location update: {}", e);
            }
        }
    });
}

/// Popup contents, requesting a first lookup when nothing is cached
#[command]
pub async fn get_popup_state(state: State<'_, DesktopState>) -> Result<PopupSnapshot, String> {
    let mut popup = state.popup.lock().await;
    popup.open().await;
    Ok(popup.snapshot())
}

/// Refresh button
#[command]
pub async fn refresh_location(state: State<'_, DesktopState>) -> Result<PopupSnapshot, String> {
    tracing::debug!("Refresh requested from popup");
    let mut popup = state.popup.lock().await;
    popup.on_refresh_clicked().await;
    Ok(popup.snapshot())
}
