use image::{Rgba, RgbaImage};
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use whereami_lib::app::{AppContext, Running};
use whereami_lib::config::AppSettings;
use whereami_lib::icon::{
    Badge, FlagDisplay, IconError, IconImage, IconSurface, BADGE_ERROR, BADGE_UNKNOWN,
};
use whereami_lib::location::ErrorState;
use whereami_lib::popup::{PopupState, PopupView, PARTIAL_WARNING};

#[derive(Default)]
struct TrayRecorder {
    icon: Mutex<Option<IconImage>>,
    badge: Mutex<Option<Badge>>,
    tooltip: Mutex<Option<String>>,
}

impl IconSurface for TrayRecorder {
    fn set_icon(&self, image: &IconImage) -> Result<(), IconError> {
        *self.icon.lock().unwrap() = Some(image.clone());
        Ok(())
    }

    fn set_badge(&self, badge: Option<&Badge>) -> Result<(), IconError> {
        *self.badge.lock().unwrap() = badge.cloned();
        Ok(())
    }

    fn set_tooltip(&self, text: &str) -> Result<(), IconError> {
        *self.tooltip.lock().unwrap() = Some(text.to_string());
        Ok(())
    }
}

impl TrayRecorder {
    fn icon_file_48(&self) -> Option<std::path::PathBuf> {
        match self.icon.lock().unwrap().clone()? {
            IconImage::Files(set) => Some(set.x48),
            IconImage::Pixels(_) => None,
        }
    }

    fn badge(&self) -> Option<Badge> {
        self.badge.lock().unwrap().clone()
    }
}

fn write_assets(root: &Path) {
    let flags = root.join("flags");
    std::fs::create_dir_all(&flags).unwrap();
    let flag = RgbaImage::from_pixel(60, 40, Rgba([0, 85, 164, 255]));
    flag.save(flags.join("fr.png")).unwrap();
    flag.save(flags.join("un.png")).unwrap();
    for size in [16, 48, 128] {
        RgbaImage::from_pixel(size, size, Rgba([66, 133, 244, 255]))
            .save(root.join(format!("icon-{size}.png")))
            .unwrap();
    }
}

struct Install {
    context: AppContext,
    tray: Arc<TrayRecorder>,
    running: Running,
    assets: TempDir,
    _data: TempDir,
}

impl Install {
    fn popup(&self) -> PopupView {
        self.context.popup(self.running.handle.clone())
    }
}

/// Fresh install talking to `server`
async fn fresh_install(server: &MockServer) -> Install {
    let assets = tempfile::tempdir().unwrap();
    write_assets(assets.path());
    let data = tempfile::tempdir().unwrap();

    let settings = AppSettings {
        api_url: format!("{}/json/", server.uri()),
        assets_dir: Some(assets.path().to_path_buf()),
        data_dir: Some(data.path().to_path_buf()),
        language: Some("en-US".to_string()),
        settle_delay_ms: 10,
        request_timeout_secs: 5,
        ..AppSettings::default()
    };

    let tray = Arc::new(TrayRecorder::default());
    let context = AppContext::build(settings, tray.clone()).await.unwrap();
    let running = context.serve();
    Install {
        context,
        tray,
        running,
        assets,
        _data: data,
    }
}

async fn respond_with(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/json/"))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Open the popup on an empty cache and wait for the first lookup
async fn open_popup(install: &Install) -> PopupState {
    let mut popup = install.popup();
    assert!(matches!(popup.open().await, PopupState::Loading { .. }));
    popup.next_change().await.unwrap().clone()
}

#[tokio::test]
async fn full_lookup_shows_flag_and_details() {
    let server = MockServer::start().await;
    respond_with(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "ip": "1.2.3.4",
            "country_name": "France",
            "country_code": "FR",
            "city": "Paris",
            "region": "IDF"
        })),
    )
    .await;
    let install = fresh_install(&server).await;

    let state = open_popup(&install).await;

    let entry = install.context.cache.read_entry().await;
    let location = entry.location.unwrap();
    assert_eq!(location.ip(), "1.2.3.4");
    assert_eq!(location.country(), "France");
    assert_eq!(location.country_code(), Some("FR"));
    assert!(!location.is_partial_data());
    assert_eq!(entry.error_state, None);
    assert!(entry.last_update.is_some());

    assert_eq!(
        install.tray.icon_file_48(),
        Some(install.assets.path().join("flags/fr.png"))
    );
    assert_eq!(install.tray.badge(), None);

    let details = state.details().unwrap();
    assert_eq!(details.country, "France");
    assert_eq!(details.country_code, "FR");
    assert_eq!(details.ip, "1.2.3.4");
    assert_eq!(details.city, "Paris");
    assert_eq!(details.region, "IDF");
    assert_eq!(details.partial_warning, None);
    assert_eq!(details.last_update, "just now");
    assert_eq!(
        details.flag,
        FlagDisplay::Image(install.assets.path().join("flags/fr.png"))
    );
}

#[tokio::test]
async fn ip_only_lookup_is_partial() {
    let server = MockServer::start().await;
    respond_with(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "ip": "5.6.7.8" })),
    )
    .await;
    let install = fresh_install(&server).await;

    let state = open_popup(&install).await;

    let location = install.context.cache.read_entry().await.location.unwrap();
    assert!(location.is_partial_data());

    // No country code: unknown flag with the unknown-location badge
    assert_eq!(
        install.tray.icon_file_48(),
        Some(install.assets.path().join("flags/un.png"))
    );
    assert_eq!(install.tray.badge(), Some(Badge::new("?", BADGE_UNKNOWN)));
    let tooltip = install.tray.tooltip.lock().unwrap().clone().unwrap();
    assert!(tooltip.contains("IP: 5.6.7.8"));
    assert!(tooltip.ends_with("⚠️ Partial location data"));

    let details = state.details().unwrap();
    assert_eq!(details.country, "Unknown Location");
    assert_eq!(details.partial_warning.as_deref(), Some(PARTIAL_WARNING));
    assert_eq!(details.ip, "5.6.7.8");
    assert_eq!(details.country_code, "-");
}

#[tokio::test]
async fn network_failure_shows_error() {
    let server = MockServer::start().await;
    respond_with(&server, ResponseTemplate::new(503)).await;
    let install = fresh_install(&server).await;

    let state = open_popup(&install).await;

    let entry = install.context.cache.read_entry().await;
    assert_eq!(entry.location, None);
    assert_eq!(entry.error_state, Some(ErrorState::NetworkError));
    assert!(entry.last_update.is_some());

    assert_eq!(
        install.tray.icon_file_48(),
        Some(install.assets.path().join("flags/un.png"))
    );
    assert_eq!(install.tray.badge(), Some(Badge::new("!", BADGE_ERROR)));

    assert_eq!(
        state.error_message(),
        Some("Network connection failed. Please check your internet connection.")
    );
}

#[tokio::test]
async fn cached_state_survives_restart() {
    let server = MockServer::start().await;
    respond_with(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "ip": "1.2.3.4",
            "country_name": "France",
            "country_code": "FR"
        })),
    )
    .await;
    let install = fresh_install(&server).await;
    open_popup(&install).await;
    let settings = install.context.settings.clone();

    let tray = Arc::new(TrayRecorder::default());
    let restarted = AppContext::build(settings, tray.clone()).await.unwrap();

    let location = restarted.cache.read_entry().await.location.unwrap();
    assert_eq!(location.country_code(), Some("FR"));
    restarted.coordinator.restore_icon().await;
    assert_eq!(
        tray.icon_file_48(),
        Some(install.assets.path().join("flags/fr.png"))
    );
    // One lookup in total; the restart only read the cache
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
