// THEORY:
// The `region_extractor` turns a binary mask into the list of spots that the rest
// of the engine counts and measures.
//
// Algorithm steps:
// 1.  **Border Following**: `imageproc`'s Suzuki-Abe tracer walks every border in
//     the mask. Only outer borders of top-level components are kept; holes, and
//     anything sitting inside a hole, do not count as separate spots.
// 2.  **Area**: each kept border is treated as a closed polygon and measured with
//     the shoelace formula. Zero-area borders (isolated pixels, 1-px lines) never
//     become a `Region`.
// 3.  **Area Filter**: a configurable lower bound (strict by default, inclusive as
//     an option) and an optional strict upper bound.
//
// Output order is the tracer's raster-scan discovery order. It is stable for a
// given mask but carries no meaning.

use crate::core_modules::color_segmenter::Mask;
use crate::core_modules::region::{Point, Region};
use crate::error::{Result, SpotError};
use imageproc::contours::{BorderType, find_contours};
use serde::{Deserialize, Serialize};

/// How the lower area bound is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowerBound {
    /// Keep regions with `area > min_area`.
    #[default]
    Strict,
    /// Keep regions with `area >= min_area`.
    Inclusive,
}

/// Area bounds applied to extracted regions, in pixel².
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaFilter {
    pub min_area: f64,
    /// Exclusive upper bound; `None` means unbounded.
    pub max_area: Option<f64>,
    pub lower_bound: LowerBound,
}

impl Default for AreaFilter {
    fn default() -> Self {
        Self {
            min_area: 50.0,
            max_area: None,
            lower_bound: LowerBound::Strict,
        }
    }
}

impl AreaFilter {
    pub fn new(min_area: f64, max_area: Option<f64>, lower_bound: LowerBound) -> Self {
        Self {
            min_area,
            max_area,
            lower_bound,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min_area.is_finite() && self.min_area >= 0.0) {
            return Err(SpotError::configuration(
                "min_area",
                format!("must be a non-negative number, got {}", self.min_area),
            ));
        }
        if let Some(max) = self.max_area {
            if max.is_nan() || max <= self.min_area {
                return Err(SpotError::configuration(
                    "max_area",
                    format!("({max}) must be greater than min_area ({})", self.min_area),
                ));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn accepts(&self, area: f64) -> bool {
        let above = match self.lower_bound {
            LowerBound::Strict => area > self.min_area,
            LowerBound::Inclusive => area >= self.min_area,
        };
        above && self.max_area.is_none_or(|max| area < max)
    }
}

pub mod region_extractor {
    use super::*;

    /// Every non-degenerate outer contour of the mask, before area filtering.
    pub fn trace_regions(mask: &Mask) -> Vec<Region> {
        // Pixels outside the frame count as background, so spots touching the
        // edge are closed off like any other.
        let padded = pad(mask);
        find_contours::<i32>(&padded)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter_map(|c| {
                let points = c.points.into_iter().map(|p| Point::new(p.x - 1, p.y - 1)).collect();
                Region::from_polygon(points)
            })
            .collect()
    }

    fn pad(mask: &Mask) -> Mask {
        let mut padded = Mask::new(mask.width() + 2, mask.height() + 2);
        image::imageops::replace(&mut padded, mask, 1, 1);
        padded
    }

    /// Outer contours of the mask that pass `filter`.
    pub fn extract_regions(mask: &Mask, filter: &AreaFilter) -> Vec<Region> {
        trace_regions(mask)
            .into_iter()
            .filter(|r| filter.accepts(r.area))
            .collect()
    }

    /// Total area of a set of regions in pixel².
    pub fn total_area(regions: &[Region]) -> f64 {
        regions.iter().map(|r| r.area).sum()
    }
}
