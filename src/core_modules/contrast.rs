// THEORY:
// The `contrast` module is the optional pre-processing layer that runs before
// segmentation. Substrate photos vary a lot in exposure, and a fixed HSV threshold
// only behaves consistently if the input is brought into a comparable range.
//
// Two independent steps, applied in this order when both are enabled:
// 1.  **Linear Adjustment**: `out = clamp(c * in + (b - 1) * 255, 0, 255)` per
//     channel, truncated. `c` stretches contrast around black, `b` shifts the
//     whole histogram. `c = b = 1` is the identity.
// 2.  **Adaptive Local Contrast (CLAHE)**: the frame is split into luma and chroma,
//     the luma channel is equalized tile by tile with a clipped histogram, tile
//     mappings are blended bilinearly, and the frame is rebuilt with the original
//     chroma. Only brightness structure changes, hue is left alone, which keeps
//     the downstream hue threshold meaningful.
//
// Every function returns a new frame; the input is never touched.

use crate::core_modules::frame_extractor::Frame;
use crate::core_modules::pixel::pixel::YCbCr;
use crate::error::{Result, SpotError};
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CLIP_LIMIT: f64 = 2.0;
pub const DEFAULT_TILE_GRID: u32 = 8;

const HISTOGRAM_BINS: usize = 256;

/// Settings for the contrast normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContrastConfig {
    /// Linear contrast multiplier, > 0.
    pub contrast: f64,
    /// Brightness multiplier, > 0. 1.0 leaves brightness unchanged.
    pub brightness: f64,
    /// Enables adaptive local-contrast enhancement on the luma channel.
    pub clahe: bool,
    pub clahe_clip_limit: f64,
    /// Number of tiles along each axis.
    pub clahe_tile_grid: u32,
}

impl Default for ContrastConfig {
    fn default() -> Self {
        Self {
            contrast: 1.0,
            brightness: 1.0,
            clahe: false,
            clahe_clip_limit: DEFAULT_CLIP_LIMIT,
            clahe_tile_grid: DEFAULT_TILE_GRID,
        }
    }
}

impl ContrastConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("contrast", self.contrast),
            ("brightness", self.brightness),
            ("clahe_clip_limit", self.clahe_clip_limit),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(SpotError::configuration(name, format!("must be a positive number, got {value}")));
            }
        }
        if self.clahe_tile_grid == 0 {
            return Err(SpotError::configuration("clahe_tile_grid", "must be at least 1"));
        }
        Ok(())
    }

    fn is_linear_identity(&self) -> bool {
        self.contrast == 1.0 && self.brightness == 1.0
    }

    /// True when normalization would change nothing.
    pub fn is_identity(&self) -> bool {
        self.is_linear_identity() && !self.clahe
    }
}

pub mod contrast {
    use super::*;

    /// Runs the enabled normalization steps over `frame`.
    pub fn normalize(frame: &Frame, config: &ContrastConfig) -> Frame {
        let adjusted = if config.is_linear_identity() {
            frame.clone()
        } else {
            adjust_linear(frame, config.contrast, config.brightness)
        };
        if config.clahe {
            equalize_local_contrast(&adjusted, config.clahe_clip_limit, config.clahe_tile_grid)
        } else {
            adjusted
        }
    }

    pub fn adjust_linear(frame: &Frame, contrast: f64, brightness: f64) -> Frame {
        let offset = (brightness - 1.0) * 255.0;
        let mut lut = [0u8; HISTOGRAM_BINS];
        for (i, slot) in lut.iter_mut().enumerate() {
            *slot = (contrast * i as f64 + offset).clamp(0.0, 255.0) as u8;
        }
        let mut out = frame.clone();
        for pixel in out.pixels_mut() {
            for c in pixel.0.iter_mut() {
                *c = lut[*c as usize];
            }
        }
        out
    }

    /// Equalizes the luma channel with CLAHE and rebuilds RGB from the original chroma.
    pub fn equalize_local_contrast(frame: &Frame, clip_limit: f64, tile_grid: u32) -> Frame {
        let split: Vec<YCbCr> = frame.pixels().map(YCbCr::from_pixel).collect();
        let luma = GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
            let l = split[(y * frame.width() + x) as usize].luma;
            Luma([l.round().clamp(0.0, 255.0) as u8])
        });

        let equalized = clahe(&luma, tile_grid, tile_grid, clip_limit);

        let mut out = frame.clone();
        for (i, pixel) in out.pixels_mut().enumerate() {
            let x = i as u32 % frame.width();
            let y = i as u32 / frame.width();
            let new_luma = equalized.get_pixel(x, y).0[0] as f32;
            *pixel = split[i].with_luma(new_luma).to_pixel();
        }
        out
    }

    /// Contrast-limited adaptive histogram equalization of a single channel.
    ///
    /// The clip threshold per bin is `clip_limit * tile_pixels / 256`; clipped
    /// excess is spread evenly over all bins before building each tile's mapping.
    pub fn clahe(gray: &GrayImage, tiles_x: u32, tiles_y: u32, clip_limit: f64) -> GrayImage {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let tiles_x = (tiles_x as usize).min(w.max(1));
        let tiles_y = (tiles_y as usize).min(h.max(1));
        if w == 0 || h == 0 || tiles_x == 0 || tiles_y == 0 {
            return gray.clone();
        }
        let tile_w = w / tiles_x;
        let tile_h = h / tiles_y;

        let mut maps = vec![[0u8; HISTOGRAM_BINS]; tiles_x * tiles_y];
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let x0 = tx * tile_w;
                let y0 = ty * tile_h;
                let x1 = if tx == tiles_x - 1 { w } else { x0 + tile_w };
                let y1 = if ty == tiles_y - 1 { h } else { y0 + tile_h };
                let tile_pixels = (x1 - x0) * (y1 - y0);

                let mut hist = [0u32; HISTOGRAM_BINS];
                for y in y0..y1 {
                    for x in x0..x1 {
                        hist[gray.get_pixel(x as u32, y as u32).0[0] as usize] += 1;
                    }
                }

                let clip = ((clip_limit * tile_pixels as f64 / HISTOGRAM_BINS as f64) as u32).max(1);
                let mut excess = 0u32;
                for bin in hist.iter_mut() {
                    if *bin > clip {
                        excess += *bin - clip;
                        *bin = clip;
                    }
                }
                let per_bin = excess / HISTOGRAM_BINS as u32;
                let remainder = (excess % HISTOGRAM_BINS as u32) as usize;
                for (i, bin) in hist.iter_mut().enumerate() {
                    *bin += per_bin + u32::from(i < remainder);
                }

                let scale = 255.0 / tile_pixels as f64;
                let map = &mut maps[ty * tiles_x + tx];
                let mut cdf = 0u32;
                for (i, bin) in hist.iter().enumerate() {
                    cdf += bin;
                    map[i] = (cdf as f64 * scale).round().min(255.0) as u8;
                }
            }
        }

        let tw = tile_w as f32;
        let th = tile_h as f32;
        GrayImage::from_fn(w as u32, h as u32, |x, y| {
            let value = gray.get_pixel(x, y).0[0] as usize;
            let fx = (x as f32 + 0.5) / tw - 0.5;
            let fy = (y as f32 + 0.5) / th - 0.5;

            let tx0 = (fx.floor() as i32).clamp(0, tiles_x as i32 - 1) as usize;
            let tx1 = (fx.floor() as i32 + 1).clamp(0, tiles_x as i32 - 1) as usize;
            let ty0 = (fy.floor() as i32).clamp(0, tiles_y as i32 - 1) as usize;
            let ty1 = (fy.floor() as i32 + 1).clamp(0, tiles_y as i32 - 1) as usize;
            let ax = fx - fx.floor();
            let ay = fy - fy.floor();

            let v00 = maps[ty0 * tiles_x + tx0][value] as f32;
            let v10 = maps[ty0 * tiles_x + tx1][value] as f32;
            let v01 = maps[ty1 * tiles_x + tx0][value] as f32;
            let v11 = maps[ty1 * tiles_x + tx1][value] as f32;

            let top = v00 * (1.0 - ax) + v10 * ax;
            let bottom = v01 * (1.0 - ax) + v11 * ax;
            Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
        })
    }
}
