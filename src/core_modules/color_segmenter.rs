// THEORY:
// The `color_segmenter` is the first analytical layer of the spot engine. It turns
// a color frame into one or more binary masks, each answering a single question
// per pixel: "does this pixel's color fall inside the configured HSV volume?"
//
// Key architectural principles:
// 1.  **Inclusive Box Threshold**: A `ColorRange` is an axis-aligned box in HSV
//     space. All six bounds are inclusive, so `hue_min == hue_max` selects exactly
//     one hue step.
// 2.  **Reject, Never Repair**: Bounds with `min > max` are a configuration error.
//     The segmenter never swaps them, because a swapped hue range selects the
//     complementary arc of the color wheel.
// 3.  **Independent Classes**: In color-class mode every named range produces its
//     own mask from the same HSV conversion. A pixel may belong to several classes;
//     there is no competition between them.
// 4.  **Stateless Utility**: Masks are derived on demand and never cached.

use crate::core_modules::frame_extractor::Frame;
use crate::core_modules::pixel::pixel::{HUE_SCALE, Hsv};
use crate::error::{Result, SpotError};
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

/// A single-channel binary raster: 255 for members, 0 otherwise.
pub type Mask = GrayImage;

pub const MASK_ON: u8 = 255;
pub const MASK_OFF: u8 = 0;

fn channel_max() -> u8 {
    u8::MAX
}

/// A thresholding volume in 8-bit HSV space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRange {
    pub hue_min: u8,
    pub hue_max: u8,
    pub sat_min: u8,
    pub val_min: u8,
    #[serde(default = "channel_max")]
    pub sat_max: u8,
    #[serde(default = "channel_max")]
    pub val_max: u8,
}

impl ColorRange {
    /// Creates a range with open-ended saturation and value (upper bounds of 255).
    pub fn new(hue_min: u8, hue_max: u8, sat_min: u8, val_min: u8) -> Result<Self> {
        Self::with_upper_bounds(hue_min, hue_max, sat_min, val_min, u8::MAX, u8::MAX)
    }

    pub fn with_upper_bounds(
        hue_min: u8,
        hue_max: u8,
        sat_min: u8,
        val_min: u8,
        sat_max: u8,
        val_max: u8,
    ) -> Result<Self> {
        let range = Self {
            hue_min,
            hue_max,
            sat_min,
            val_min,
            sat_max,
            val_max,
        };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hue_max as u16 > HUE_SCALE {
            return Err(SpotError::configuration(
                "hue_max",
                format!("must be at most {HUE_SCALE}, got {}", self.hue_max),
            ));
        }
        let pairs = [
            ("hue", self.hue_min, self.hue_max),
            ("sat", self.sat_min, self.sat_max),
            ("val", self.val_min, self.val_max),
        ];
        for (name, min, max) in pairs {
            if min > max {
                return Err(SpotError::configuration(
                    format!("{name}_min"),
                    format!("({min}) must not exceed {name}_max ({max})"),
                ));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn contains(&self, hsv: Hsv) -> bool {
        (self.hue_min..=self.hue_max).contains(&hsv.hue)
            && (self.sat_min..=self.sat_max).contains(&hsv.saturation)
            && (self.val_min..=self.val_max).contains(&hsv.value)
    }
}

impl Default for ColorRange {
    /// Reds through oranges with moderate saturation and brightness.
    fn default() -> Self {
        Self {
            hue_min: 0,
            hue_max: 30,
            sat_min: 70,
            val_min: 50,
            sat_max: u8::MAX,
            val_max: u8::MAX,
        }
    }
}

/// A named color range used in color-class mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorClass {
    pub label: String,
    #[serde(flatten)]
    pub range: ColorRange,
}

impl ColorClass {
    pub fn new(label: impl Into<String>, range: ColorRange) -> Self {
        Self {
            label: label.into(),
            range,
        }
    }
}

/// A frame converted to HSV once, ready to be thresholded by any number of ranges.
pub struct HsvFrame {
    width: u32,
    height: u32,
    pixels: Vec<Hsv>,
}

impl HsvFrame {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            pixels: frame.pixels().map(Hsv::from_pixel).collect(),
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Hsv {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn threshold(&self, range: &ColorRange) -> Mask {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            if range.contains(self.get(x, y)) {
                Luma([MASK_ON])
            } else {
                Luma([MASK_OFF])
            }
        })
    }
}

pub mod color_segmenter {
    use super::*;

    /// Produces the membership mask of `frame` for a single range.
    pub fn segment(frame: &Frame, range: &ColorRange) -> Mask {
        HsvFrame::from_frame(frame).threshold(range)
    }

    /// Produces one mask per class, in class order, sharing one HSV conversion.
    pub fn segment_classes<'a>(frame: &Frame, classes: &'a [ColorClass]) -> Vec<(&'a str, Mask)> {
        let hsv = HsvFrame::from_frame(frame);
        classes
            .iter()
            .map(|class| (class.label.as_str(), hsv.threshold(&class.range)))
            .collect()
    }

    /// Number of member pixels in a mask.
    pub fn count_members(mask: &Mask) -> usize {
        mask.pixels().filter(|p| p.0[0] == MASK_ON).count()
    }
}
