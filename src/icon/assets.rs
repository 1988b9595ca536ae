//! Flag and icon files on disk
//!
//! Layout under the assets root:
//! `flags/<cc>.png` per lowercase ISO 3166-1 alpha-2 code, `flags/un.png`
//! for an unknown location, `icon-16.png`, `icon-48.png`, `icon-128.png`.

use image::RgbaImage;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::IconError;

pub const ICON_SIZES: [u32; 3] = [16, 48, 128];
const UNKNOWN_FLAG: &str = "un";

/// One image path per required icon size
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IconSet {
    pub x16: PathBuf,
    pub x48: PathBuf,
    pub x128: PathBuf,
}

impl IconSet {
    /// Same image at every size
    pub fn uniform(path: PathBuf) -> Self {
        Self {
            x16: path.clone(),
            x48: path.clone(),
            x128: path,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Path)> {
        ICON_SIZES
            .into_iter()
            .zip([self.x16.as_path(), self.x48.as_path(), self.x128.as_path()])
    }

    /// Path closest to `size` pixels, preferring the larger one
    pub fn best_for(&self, size: u32) -> &Path {
        self.iter()
            .find(|(s, _)| *s >= size)
            .map(|(_, path)| path)
            .unwrap_or(self.x128.as_path())
    }
}

/// What the popup shows in place of the flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum FlagDisplay {
    Image(PathBuf),
    Placeholder(String),
}

#[derive(Debug, Clone)]
pub struct FlagAssets {
    root: PathBuf,
}

impl FlagAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a country flag; `None` for anything that is not a plain
    /// two or three letter code.
    pub fn flag_path(&self, country_code: &str) -> Option<PathBuf> {
        let code = country_code.trim().to_ascii_lowercase();
        let valid = (2..=3).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphabetic());
        valid.then(|| self.root.join("flags").join(format!("{code}.png")))
    }

    pub fn unknown_flag_path(&self) -> PathBuf {
        self.root.join("flags").join(format!("{UNKNOWN_FLAG}.png"))
    }

    pub fn default_icon(&self) -> IconSet {
        IconSet {
            x16: self.root.join("icon-16.png"),
            x48: self.root.join("icon-48.png"),
            x128: self.root.join("icon-128.png"),
        }
    }

    /// Usable flag file for `country_code`
    pub fn existing_flag(&self, country_code: &str) -> Result<PathBuf, IconError> {
        let path = self
            .flag_path(country_code)
            .ok_or_else(|| IconError::InvalidCode(country_code.to_string()))?;
        ensure_exists(path)
    }

    pub fn existing_unknown_flag(&self) -> Result<PathBuf, IconError> {
        ensure_exists(self.unknown_flag_path())
    }

    pub fn existing_default_icon(&self) -> Result<IconSet, IconError> {
        let set = self.default_icon();
        for (_, path) in set.iter() {
            ensure_exists(path.to_path_buf())?;
        }
        Ok(set)
    }

    /// Flag for the popup: country flag, then unknown flag, then a text
    /// placeholder (the code, or a globe when there is none).
    pub fn popup_flag(&self, country_code: Option<&str>) -> FlagDisplay {
        let flag = country_code.and_then(|code| self.existing_flag(code).ok());
        if let Some(path) = flag {
            return FlagDisplay::Image(path);
        }
        if let Ok(path) = self.existing_unknown_flag() {
            return FlagDisplay::Image(path);
        }
        FlagDisplay::Placeholder(
            country_code
                .map(str::to_ascii_uppercase)
                .unwrap_or_else(|| "🌍".to_string()),
        )
    }
}

fn ensure_exists(path: PathBuf) -> Result<PathBuf, IconError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(IconError::MissingAsset(path))
    }
}

/// Decode an image file into RGBA8
pub fn load_rgba(path: &Path) -> Result<RgbaImage, IconError> {
    let image = image::open(path).map_err(|err| IconError::Decode {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    Ok(image.to_rgba8())
}
