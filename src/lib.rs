//! Where am I - public IP location in the tray
//!
//! Looks up where the machine's public IP address is, shows the country
//! flag as the tray icon and keeps the details for the popup.

pub mod app;
pub mod config;
pub mod i18n;
pub mod icon;
pub mod location;
pub mod popup;
pub mod refresh;
pub mod storage;

#[cfg(feature = "desktop")]
pub mod commands;
#[cfg(feature = "desktop")]
pub mod tray;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging to stderr. `RUST_LOG` is honoured; `default_directive`
/// is added on top of it.
pub fn init_logging(default_directive: &str) {
    let mut filter = EnvFilter::from_default_env();
    match default_directive.parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(err) => eprintln!("Ignoring log directive {:?}: {}", default_directive, err),
    }

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use tauri::Manager;

    init_logging("whereami=debug");

    tauri::Builder::default()
        .plugin(tauri_plugin_positioner::init())
        .setup(|app| {
            tray::setup_tray(app.handle())?;
            tray::create_popup_window(app.handle())?;

            let mut settings = config::AppSettings::load()?;
            settings.use_assets_dir_if_unset(app.path().resource_dir()?.join("icons"));
            let surface = std::sync::Arc::new(tray::TraySurface::new(app.handle().clone()));
            let state = tauri::async_runtime::block_on(commands::DesktopState::start(
                settings, surface,
            ))?;
            commands::forward_changes(app.handle().clone(), &state);
            app.manage(state);

            tracing::info!("Where am I initialized successfully");
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::get_popup_state,
            commands::refresh_location,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
