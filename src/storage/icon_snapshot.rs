//! Icon surface for running without a tray
//!
//! Writes the composited icon to `icon.png` and its badge and tooltip to
//! `icon-state.json`, so the CLI and status scripts can show what the tray
//! would.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::icon::assets::load_rgba;
use crate::icon::canvas::compose_badge;
use crate::icon::{Badge, IconError, IconImage, IconSurface, RgbaIcon, CANVAS_SIZE};

const ICON_FILENAME: &str = "icon.png";
const STATE_FILENAME: &str = "icon-state.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IconSnapshot {
    pub updated_at: String,
    pub icon_file: Option<String>,
    pub badge_text: Option<String>,
    pub badge_color: Option<String>,
    pub tooltip: Option<String>,
}

#[derive(Default)]
struct SnapshotState {
    base: Option<RgbaIcon>,
    badge: Option<Badge>,
    snapshot: IconSnapshot,
}

pub struct IconSnapshotSurface {
    dir: PathBuf,
    state: Mutex<SnapshotState>,
}

impl IconSnapshotSurface {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let snapshot = read_icon_snapshot(&dir).unwrap_or_default();
        Self {
            dir,
            state: Mutex::new(SnapshotState {
                snapshot,
                ..SnapshotState::default()
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut SnapshotState) -> Result<T, IconError>,
    ) -> Result<T, IconError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| IconError::Surface("snapshot state poisoned".into()))?;
        f(&mut state)
    }

    fn write_icon(&self, state: &mut SnapshotState) -> Result<(), IconError> {
        let Some(base) = state.base.as_ref() else {
            return Ok(());
        };
        let image = compose_badge(base, state.badge.as_ref())
            .to_image()
            .ok_or_else(|| IconError::Surface("icon buffer has the wrong size".into()))?;
        fs::create_dir_all(&self.dir).map_err(surface_error)?;
        let path = self.dir.join(ICON_FILENAME);
        image.save(&path).map_err(surface_error)?;
        state.snapshot.icon_file = Some(path.display().to_string());
        Ok(())
    }

    fn write_state(&self, state: &mut SnapshotState) -> Result<(), IconError> {
        state.snapshot.updated_at = Utc::now().to_rfc3339();
        fs::create_dir_all(&self.dir).map_err(surface_error)?;
        let payload = serde_json::to_string_pretty(&state.snapshot).map_err(surface_error)?;
        fs::write(self.dir.join(STATE_FILENAME), payload).map_err(surface_error)
    }
}

impl IconSurface for IconSnapshotSurface {
    fn set_icon(&self, image: &IconImage) -> Result<(), IconError> {
        let base = match image {
            IconImage::Files(set) => RgbaIcon::from(load_rgba(set.best_for(CANVAS_SIZE))?),
            IconImage::Pixels(icon) => icon.clone(),
        };
        self.with_state(|state| {
            state.base = Some(base);
            self.write_icon(state)?;
            self.write_state(state)
        })
    }

    fn set_badge(&self, badge: Option<&Badge>) -> Result<(), IconError> {
        self.with_state(|state| {
            state.badge = badge.cloned();
            state.snapshot.badge_text = badge.map(|b| b.text.clone());
            state.snapshot.badge_color = badge.map(Badge::hex_color);
            self.write_icon(state)?;
            self.write_state(state)
        })
    }

    fn set_tooltip(&self, text: &str) -> Result<(), IconError> {
        self.with_state(|state| {
            state.snapshot.tooltip = Some(text.to_string());
            self.write_state(state)
        })
    }
}

fn surface_error(err: impl std::fmt::Display) -> IconError {
    IconError::Surface(err.to_string())
}

/// Last snapshot written to `dir`, if any
pub fn read_icon_snapshot(dir: &Path) -> Option<IconSnapshot> {
    let contents = fs::read_to_string(dir.join(STATE_FILENAME)).ok()?;
    serde_json::from_str(&contents).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icon::{Canvas, BADGE_ERROR};

    fn blue_icon() -> RgbaIcon {
        let mut canvas = Canvas::new(CANVAS_SIZE, CANVAS_SIZE);
        canvas.fill([66, 133, 244, 255]);
        canvas.into_icon()
    }

    #[test]
    fn writes_icon_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let surface = IconSnapshotSurface::new(dir.path());

        surface.set_icon(&IconImage::Pixels(blue_icon())).unwrap();
        surface
            .set_badge(Some(&Badge::new("!", BADGE_ERROR)))
            .unwrap();
        surface.set_tooltip("Where am I").unwrap();

        let snapshot = read_icon_snapshot(dir.path()).unwrap();
        assert_eq!(snapshot.badge_text.as_deref(), Some("!"));
        assert_eq!(snapshot.badge_color.as_deref(), Some("#FF0000"));
        assert_eq!(snapshot.tooltip.as_deref(), Some("Where am I"));

        let png = image::open(dir.path().join(ICON_FILENAME)).unwrap().to_rgba8();
        assert_eq!(png.dimensions(), (CANVAS_SIZE, CANVAS_SIZE));
        // Badge box sits in the bottom-right corner
        assert_eq!(png.get_pixel(CANVAS_SIZE - 1, CANVAS_SIZE - 1).0, BADGE_ERROR);
        assert_eq!(png.get_pixel(0, 0).0, [66, 133, 244, 255]);
    }

    #[test]
    fn clearing_badge_restores_plain_icon() {
        let dir = tempfile::tempdir().unwrap();
        let surface = IconSnapshotSurface::new(dir.path());
        surface.set_icon(&IconImage::Pixels(blue_icon())).unwrap();
        surface
            .set_badge(Some(&Badge::new("!", BADGE_ERROR)))
            .unwrap();

        surface.set_badge(None).unwrap();

        let snapshot = read_icon_snapshot(dir.path()).unwrap();
        assert_eq!(snapshot.badge_text, None);
        let png = image::open(dir.path().join(ICON_FILENAME)).unwrap().to_rgba8();
        assert_eq!(
            png.get_pixel(CANVAS_SIZE - 1, CANVAS_SIZE - 1).0,
            [66, 133, 244, 255]
        );
    }

    #[test]
    fn unreadable_file_icon_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let surface = IconSnapshotSurface::new(dir.path());
        let missing = crate::icon::IconSet::uniform(dir.path().join("nope.png"));

        assert!(surface.set_icon(&IconImage::Files(missing)).is_err());
        assert!(read_icon_snapshot(dir.path()).is_none());
    }

    #[test]
    fn tooltip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        IconSnapshotSurface::new(dir.path())
            .set_tooltip("first")
            .unwrap();

        let reopened = IconSnapshotSurface::new(dir.path());
        reopened
            .set_icon(&IconImage::Pixels(blue_icon()))
            .unwrap();

        let snapshot = read_icon_snapshot(dir.path()).unwrap();
        assert_eq!(snapshot.tooltip.as_deref(), Some("first"));
        assert!(snapshot.icon_file.is_some());
    }
}
