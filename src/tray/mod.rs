//! System tray icon and popup window management

use anyhow::Result;
use std::sync::Mutex;
use tauri::{
    image::Image,
    tray::{MouseButton, MouseButtonState, TrayIconBuilder, TrayIconEvent},
    AppHandle, Manager, WebviewUrl, WebviewWindowBuilder,
};
use tauri_plugin_positioner::{Position, WindowExt};

use crate::commands::DesktopState;
use crate::icon::assets::load_rgba;
use crate::icon::canvas::compose_badge;
use crate::icon::{draw_default_icon, Badge, IconError, IconImage, IconSurface, RgbaIcon};

const TRAY_ICON_ID: &str = "main";
const POPUP_LABEL: &str = "popup";
const ICON_SIZE: u32 = 32;

/// Tray icon as an [`IconSurface`]. The badge is painted into the icon
/// pixels; on macOS it is also shown as the tray title.
pub struct TraySurface {
    app: AppHandle,
    state: Mutex<TrayState>,
}

#[derive(Default)]
struct TrayState {
    base: Option<RgbaIcon>,
    badge: Option<Badge>,
}

impl TraySurface {
    pub fn new(app: AppHandle) -> Self {
        Self {
            app,
            state: Mutex::new(TrayState::default()),
        }
    }

    fn redraw(&self, state: &TrayState) -> Result<(), IconError> {
        let Some(base) = state.base.as_ref() else {
            return Ok(());
        };
        let tray = self
            .app
            .tray_by_id(TRAY_ICON_ID)
            .ok_or_else(|| IconError::Surface("tray icon not found".into()))?;
        tray.set_icon(Some(to_tauri_image(&compose_badge(base, state.badge.as_ref()))))
            .map_err(surface_error)?;
        tray.set_icon_as_template(false).map_err(surface_error)?;

        #[cfg(target_os = "macos")]
        tray.set_title(state.badge.as_ref().map(|b| b.text.clone()))
            .map_err(surface_error)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, TrayState>, IconError> {
        self.state
            .lock()
            .map_err(|_| IconError::Surface("tray state lock poisoned".into()))
    }
}

impl IconSurface for TraySurface {
    fn set_icon(&self, image: &IconImage) -> Result<(), IconError> {
        let base = match image {
            IconImage::Files(set) => RgbaIcon::from(load_rgba(set.best_for(ICON_SIZE))?),
            IconImage::Pixels(icon) => icon.clone(),
        };
        let mut state = self.lock()?;
        let previous = state.base.replace(base);
        if let Err(err) = self.redraw(&state) {
            state.base = previous;
            return Err(err);
        }
        Ok(())
    }

    fn set_badge(&self, badge: Option<&Badge>) -> Result<(), IconError> {
        let mut state = self.lock()?;
        state.badge = badge.cloned();
        self.redraw(&state)
    }

    fn set_tooltip(&self, text: &str) -> Result<(), IconError> {
        let tray = self
            .app
            .tray_by_id(TRAY_ICON_ID)
            .ok_or_else(|| IconError::Surface("tray icon not found".into()))?;
        tray.set_tooltip(Some(text)).map_err(surface_error)
    }
}

fn surface_error(err: tauri::Error) -> IconError {
    IconError::Surface(err.to_string())
}

fn to_tauri_image(icon: &RgbaIcon) -> Image<'static> {
    Image::new_owned(icon.pixels.clone(), icon.width, icon.height)
}

pub fn setup_tray(app: &AppHandle) -> Result<()> {
    let _tray = TrayIconBuilder::with_id(TRAY_ICON_ID)
        .tooltip("Where am I")
        .icon(to_tauri_image(&draw_default_icon()))
        .icon_as_template(false)
        .on_tray_icon_event(|tray, event| {
            tauri_plugin_positioner::on_tray_event(tray.app_handle(), &event);

            if let TrayIconEvent::Click {
                button: MouseButton::Left,
                button_state: MouseButtonState::Up,
                ..
            } = event
            {
                tracing::info!("Tray icon clicked");
                let app = tray.app_handle().clone();
                tauri::async_runtime::spawn(async move {
                    if let Some(state) = app.try_state::<DesktopState>() {
                        if let Err(e) = state.click().await {
                            tracing::error!("Failed to queue click refresh: {}", e);
                        }
                    }
                });
                if let Err(e) = toggle_popup(tray.app_handle()) {
                    tracing::error!("Failed to toggle popup: {}", e);
                }
            }
        })
        .build(app)?;

    tracing::info!("Tray icon created");
    Ok(())
}

pub fn create_popup_window(app: &AppHandle) -> Result<()> {
    let window = WebviewWindowBuilder::new(app, POPUP_LABEL, WebviewUrl::App("index.html".into()))
        .title("Where am I")
        .inner_size(320.0, 380.0)
        .resizable(false)
        .visible(false)
        .decorations(false)
        .always_on_top(true)
        .skip_taskbar(true)
        .focused(true)
        .build()?;

    #[cfg(debug_assertions)]
    window.open_devtools();

    tracing::info!("Popup window created");
    Ok(())
}

fn toggle_popup(app: &AppHandle) -> Result<()> {
    let Some(window) = app.get_webview_window(POPUP_LABEL) else {
        tracing::warn!("Popup window not found!");
        return Ok(());
    };

    if window.is_visible().unwrap_or(false) {
        tracing::debug!("Hiding popup");
        window.hide()?;
    } else {
        if let Err(e) = window.as_ref().window().move_window(Position::TrayCenter) {
            tracing::warn!("Failed to position popup at the tray: {}", e);
            if let Err(e) = window
                .as_ref()
                .window()
                .move_window(Position::TrayBottomCenter)
            {
                tracing::error!("Failed to position popup: {}", e);
            }
        }
        tracing::debug!("Showing popup");
        window.show()?;
        window.set_focus()?;
    }
    Ok(())
}
