//! Small RGBA raster used to synthesize tray icons

use image::{imageops, imageops::FilterType, RgbaImage};

use super::Badge;

pub const WHITE: [u8; 4] = [255, 255, 255, 255];

/// Owned RGBA8 pixels, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaIcon {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbaIcon {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 4) as usize;
        let mut out = [0; 4];
        out.copy_from_slice(&self.pixels[idx..idx + 4]);
        Some(out)
    }

    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
    }
}

impl From<RgbaImage> for RgbaIcon {
    fn from(image: RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
        }
    }
}

pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width * height * 4) as usize],
        }
    }

    pub fn from_icon(icon: &RgbaIcon) -> Self {
        Self {
            width: icon.width,
            height: icon.height,
            pixels: icon.pixels.clone(),
        }
    }

    pub fn fill(&mut self, color: [u8; 4]) {
        for chunk in self.pixels.chunks_exact_mut(4) {
            chunk.copy_from_slice(&color);
        }
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, color: [u8; 4]) {
        if x < 0 || y < 0 {
            return;
        }
        let x = x as u32;
        let y = y as u32;
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y * self.width + x) * 4) as usize;
        self.pixels[idx..idx + 4].copy_from_slice(&color);
    }

    /// Source-over blend of one pixel
    fn blend_pixel(&mut self, x: i32, y: i32, color: [u8; 4]) {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return;
        }
        let idx = ((y as u32 * self.width + x as u32) * 4) as usize;
        let alpha = color[3] as u32;
        if alpha == 255 {
            self.pixels[idx..idx + 4].copy_from_slice(&color);
            return;
        }
        let dst = &mut self.pixels[idx..idx + 4];
        for channel in 0..3 {
            let src = color[channel] as u32;
            let old = dst[channel] as u32;
            dst[channel] = ((src * alpha + old * (255 - alpha)) / 255) as u8;
        }
        dst[3] = (alpha + dst[3] as u32 * (255 - alpha) / 255).min(255) as u8;
    }

    pub fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: [u8; 4]) {
        for dy in 0..height as i32 {
            for dx in 0..width as i32 {
                self.set_pixel(x + dx, y + dy, color);
            }
        }
    }

    pub fn draw_filled_circle(&mut self, center_x: f64, center_y: f64, radius: f64, color: [u8; 4]) {
        let radius_sq = radius * radius;
        let min_x = (center_x - radius).floor() as i32;
        let max_x = (center_x + radius).ceil() as i32;
        let min_y = (center_y - radius).floor() as i32;
        let max_y = (center_y + radius).ceil() as i32;

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let dx = (x as f64 + 0.5) - center_x;
                let dy = (y as f64 + 0.5) - center_y;
                if (dx * dx + dy * dy) <= radius_sq {
                    self.set_pixel(x, y, color);
                }
            }
        }
    }

    pub fn draw_ring(
        &mut self,
        center_x: f64,
        center_y: f64,
        outer_radius: f64,
        thickness: f64,
        color: [u8; 4],
    ) {
        let inner_radius = (outer_radius - thickness).max(0.0);
        let outer_sq = outer_radius * outer_radius;
        let inner_sq = inner_radius * inner_radius;
        let min_x = (center_x - outer_radius).floor() as i32;
        let max_x = (center_x + outer_radius).ceil() as i32;
        let min_y = (center_y - outer_radius).floor() as i32;
        let max_y = (center_y + outer_radius).ceil() as i32;

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let dx = (x as f64 + 0.5) - center_x;
                let dy = (y as f64 + 0.5) - center_y;
                let dist_sq = dx * dx + dy * dy;
                if dist_sq <= outer_sq && dist_sq >= inner_sq {
                    self.set_pixel(x, y, color);
                }
            }
        }
    }

    /// Draw `image` scaled to fit inside a `box_width`x`box_height` box,
    /// aspect ratio kept, centered on the canvas.
    ///
    /// Returns the placed rectangle `(x, y, width, height)`.
    pub fn draw_image_fit(
        &mut self,
        image: &RgbaImage,
        box_width: u32,
        box_height: u32,
    ) -> (i32, i32, u32, u32) {
        let (src_w, src_h) = image.dimensions();
        let scale = f64::min(
            box_width as f64 / src_w as f64,
            box_height as f64 / src_h as f64,
        );
        let width = ((src_w as f64 * scale).round() as u32).max(1);
        let height = ((src_h as f64 * scale).round() as u32).max(1);
        let x = (self.width as i32 - width as i32) / 2;
        let y = (self.height as i32 - height as i32) / 2;

        let scaled = imageops::resize(image, width, height, FilterType::Triangle);
        for (dx, dy, pixel) in scaled.enumerate_pixels() {
            self.blend_pixel(x + dx as i32, y + dy as i32, pixel.0);
        }
        (x, y, width, height)
    }

    /// Paint `badge` in the bottom-right corner: a colored box with white text.
    pub fn draw_badge(&mut self, badge: &Badge) {
        let text: Vec<char> = badge
            .text
            .chars()
            .map(|c| c.to_ascii_uppercase())
            .take(3)
            .collect();
        if text.is_empty() {
            return;
        }

        let scale = (self.height / 16).max(1) as i32;
        let pad = scale;
        let text_width = text.len() as i32 * (GLYPH_WIDTH + 1) * scale - scale;
        let box_width = (text_width + pad * 2).min(self.width as i32);
        let box_height = GLYPH_HEIGHT * scale + pad * 2;
        let box_x = self.width as i32 - box_width;
        let box_y = self.height as i32 - box_height;

        self.fill_rect(box_x, box_y, box_width as u32, box_height as u32, badge.color);

        let mut pen_x = box_x + pad;
        for ch in text {
            self.draw_glyph(ch, pen_x, box_y + pad, scale, WHITE);
            pen_x += (GLYPH_WIDTH + 1) * scale;
        }
    }

    fn draw_glyph(&mut self, ch: char, x: i32, y: i32, scale: i32, color: [u8; 4]) {
        let Some(rows) = glyph(ch) else {
            return;
        };
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                for sy in 0..scale {
                    for sx in 0..scale {
                        self.set_pixel(
                            x + col * scale + sx,
                            y + row as i32 * scale + sy,
                            color,
                        );
                    }
                }
            }
        }
    }

    pub fn into_icon(self) -> RgbaIcon {
        RgbaIcon {
            width: self.width,
            height: self.height,
            pixels: self.pixels,
        }
    }
}

/// Copy of `base` with `badge` painted over it
pub fn compose_badge(base: &RgbaIcon, badge: Option<&Badge>) -> RgbaIcon {
    let mut canvas = Canvas::from_icon(base);
    if let Some(badge) = badge {
        canvas.draw_badge(badge);
    }
    canvas.into_icon()
}

const GLYPH_WIDTH: i32 = 3;
const GLYPH_HEIGHT: i32 = 5;

/// 3x5 bitmap rows, most significant of the low three bits is the left column
fn glyph(ch: char) -> Option<[u8; 5]> {
    let rows = match ch {
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'Q' => [0b010, 0b101, 0b101, 0b110, 0b011],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '?' => [0b110, 0b001, 0b010, 0b000, 0b010],
        '!' => [0b010, 0b010, 0b010, 0b000, 0b010],
        _ => return None,
    };
    Some(rows)
}
