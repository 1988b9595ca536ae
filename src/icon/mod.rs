//! Tray icon rendering with an ordered fallback ladder
//!
//! Each [`RenderStrategy`] turns an [`IconRequest`] into an [`IconAction`]
//! or declines. The renderer tries them in order, applies the first plan the
//! surface accepts and swallows every failure on the way down.

pub mod assets;
pub mod canvas;

pub use assets::{FlagAssets, FlagDisplay, IconSet};
pub use canvas::{Canvas, RgbaIcon};

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use canvas::WHITE;

pub const CANVAS_SIZE: u32 = 48;
pub const FLAG_BOX_WIDTH: u32 = 40;
pub const FLAG_BOX_HEIGHT: u32 = 30;

pub const BADGE_UNKNOWN: [u8; 4] = [0xFF, 0x6B, 0x35, 0xFF];
pub const BADGE_PARTIAL: [u8; 4] = [0xFF, 0xA5, 0x00, 0xFF];
pub const BADGE_CODE: [u8; 4] = [0x42, 0x85, 0xF4, 0xFF];
pub const BADGE_ERROR: [u8; 4] = [0xFF, 0x00, 0x00, 0xFF];

#[derive(Error, Debug)]
pub enum IconError {
    #[error("Missing icon asset: {0}")]
    MissingAsset(PathBuf),
    #[error("Not a country code: {0:?}")]
    InvalidCode(String),
    #[error("Failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },
    #[error("Icon surface error: {0}")]
    Surface(String),
}

/// Text and color drawn over the icon
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub text: String,
    pub color: [u8; 4],
}

impl Badge {
    pub fn new(text: impl Into<String>, color: [u8; 4]) -> Self {
        Self {
            text: text.into(),
            color,
        }
    }

    pub fn hex_color(&self) -> String {
        format!(
            "#{:02X}{:02X}{:02X}",
            self.color[0], self.color[1], self.color[2]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconImage {
    Files(IconSet),
    Pixels(RgbaIcon),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderTier {
    UnknownLocation,
    DirectFlag,
    CanvasFlag,
    GenericWithCode,
    DefaultIcon,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconAction {
    pub tier: RenderTier,
    pub image: IconImage,
    pub badge: Option<Badge>,
}

/// Input to one icon update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IconRequest {
    pub country_code: Option<String>,
    pub is_partial_data: bool,
    /// The lookup failed; unknown-location tiers carry the error badge
    pub failed: bool,
}

impl IconRequest {
    pub fn location(country_code: Option<&str>, is_partial_data: bool) -> Self {
        Self {
            country_code: country_code.map(str::to_string),
            is_partial_data,
            failed: false,
        }
    }

    pub fn failure() -> Self {
        Self {
            country_code: None,
            is_partial_data: false,
            failed: true,
        }
    }

    fn partial_badge(&self) -> Option<Badge> {
        self.is_partial_data.then(|| Badge::new("!", BADGE_PARTIAL))
    }

    fn no_code_badge(&self) -> Badge {
        if self.failed {
            Badge::new("!", BADGE_ERROR)
        } else {
            Badge::new("?", BADGE_UNKNOWN)
        }
    }
}

/// Where icons end up: the tray, a snapshot file, a test recorder
pub trait IconSurface: Send + Sync {
    fn set_icon(&self, image: &IconImage) -> Result<(), IconError>;

    /// `None` clears the badge
    fn set_badge(&self, badge: Option<&Badge>) -> Result<(), IconError>;

    fn set_tooltip(&self, text: &str) -> Result<(), IconError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStrategy {
    UnknownLocation,
    DirectFlag,
    CanvasFlag,
    GenericWithCode,
    DefaultIcon,
}

impl RenderStrategy {
    pub const LADDER: [RenderStrategy; 5] = [
        RenderStrategy::UnknownLocation,
        RenderStrategy::DirectFlag,
        RenderStrategy::CanvasFlag,
        RenderStrategy::GenericWithCode,
        RenderStrategy::DefaultIcon,
    ];

    pub fn tier(&self) -> RenderTier {
        match self {
            RenderStrategy::UnknownLocation => RenderTier::UnknownLocation,
            RenderStrategy::DirectFlag => RenderTier::DirectFlag,
            RenderStrategy::CanvasFlag => RenderTier::CanvasFlag,
            RenderStrategy::GenericWithCode => RenderTier::GenericWithCode,
            RenderStrategy::DefaultIcon => RenderTier::DefaultIcon,
        }
    }

    /// Plan this tier for `request`. `Ok(None)` when the tier does not apply.
    pub fn plan(
        &self,
        request: &IconRequest,
        assets: &FlagAssets,
    ) -> Result<Option<IconAction>, IconError> {
        let code = request.country_code.as_deref();
        let action = |image, badge| {
            Ok(Some(IconAction {
                tier: self.tier(),
                image,
                badge,
            }))
        };

        match (self, code) {
            (RenderStrategy::UnknownLocation, None) => {
                let path = assets.existing_unknown_flag()?;
                action(
                    IconImage::Files(IconSet::uniform(path)),
                    Some(request.no_code_badge()),
                )
            }
            (RenderStrategy::UnknownLocation, Some(_)) => Ok(None),
            (_, None) if *self != RenderStrategy::DefaultIcon => Ok(None),
            (RenderStrategy::DirectFlag, Some(code)) => {
                let path = assets.existing_flag(code)?;
                action(
                    IconImage::Files(IconSet::uniform(path)),
                    request.partial_badge(),
                )
            }
            (RenderStrategy::CanvasFlag, Some(code)) => {
                let path = assets.existing_flag(code)?;
                let flag = assets::load_rgba(&path)?;
                let mut canvas = Canvas::new(CANVAS_SIZE, CANVAS_SIZE);
                canvas.fill(WHITE);
                canvas.draw_image_fit(&flag, FLAG_BOX_WIDTH, FLAG_BOX_HEIGHT);
                action(
                    IconImage::Pixels(canvas.into_icon()),
                    request.partial_badge(),
                )
            }
            (RenderStrategy::GenericWithCode, Some(code)) => {
                let path = assets.existing_unknown_flag()?;
                action(
                    IconImage::Files(IconSet::uniform(path)),
                    Some(Badge::new(code.to_ascii_uppercase(), BADGE_CODE)),
                )
            }
            (RenderStrategy::DefaultIcon, code) => {
                let image = match assets.existing_default_icon() {
                    Ok(set) => IconImage::Files(set),
                    Err(err) => {
                        tracing::debug!("Default icon files unusable ({}), drawing one", err);
                        IconImage::Pixels(draw_default_icon())
                    }
                };
                let badge = match code {
                    Some(code) => Badge::new(code.to_ascii_uppercase(), BADGE_CODE),
                    None => request.no_code_badge(),
                };
                action(image, Some(badge))
            }
            // `(_, None)` is handled above for every tier but the last
            (_, None) => Ok(None),
        }
    }
}

/// Globe-like ring used when even the bundled default icon is gone
pub fn draw_default_icon() -> RgbaIcon {
    let mut canvas = Canvas::new(CANVAS_SIZE, CANVAS_SIZE);
    let center = CANVAS_SIZE as f64 / 2.0;
    let ring_color = [66, 133, 244, 255];
    canvas.draw_filled_circle(center, center, center - 4.0, [232, 240, 254, 255]);
    canvas.draw_ring(center, center, center - 4.0, 3.0, ring_color);
    canvas.draw_ring(center, center, 8.0, 2.0, ring_color);
    canvas.into_icon()
}

pub struct IconRenderer {
    assets: FlagAssets,
    surface: Arc<dyn IconSurface>,
    ladder: Vec<RenderStrategy>,
}

impl IconRenderer {
    pub fn new(assets: FlagAssets, surface: Arc<dyn IconSurface>) -> Self {
        Self {
            assets,
            surface,
            ladder: RenderStrategy::LADDER.to_vec(),
        }
    }

    pub fn assets(&self) -> &FlagAssets {
        &self.assets
    }

    /// Render the icon for `request`. Never fails; returns the tier that
    /// ended up on the surface, `None` if the surface refused every tier.
    pub fn update(&self, request: &IconRequest) -> Option<RenderTier> {
        for strategy in &self.ladder {
            let action = match strategy.plan(request, &self.assets) {
                Ok(Some(action)) => action,
                Ok(None) => continue,
                Err(err) => {
                    tracing::debug!("Icon tier {:?} unavailable: {}", strategy, err);
                    continue;
                }
            };

            match self.apply(&action) {
                Ok(()) => {
                    tracing::debug!("Icon rendered with tier {:?}", action.tier);
                    return Some(action.tier);
                }
                Err(err) => {
                    tracing::warn!("Icon tier {:?} failed: {}", strategy, err);
                }
            }
        }

        tracing::warn!("No icon tier could be rendered");
        None
    }

    fn apply(&self, action: &IconAction) -> Result<(), IconError> {
        self.surface.set_icon(&action.image)?;
        self.surface.set_badge(action.badge.as_ref())
    }

    /// Tooltip errors are logged and dropped
    pub fn set_tooltip(&self, text: &str) {
        if let Err(err) = self.surface.set_tooltip(text) {
            tracing::warn!("Failed to set tooltip: {}", err);
        }
    }
}
