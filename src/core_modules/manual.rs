// THEORY:
// The `manual` module is the side entrance for human-drawn spots. An annotation
// surface supplies freehand polygons over a displayed frame; those polygons skip
// segmentation and contour extraction entirely and go straight to measurement,
// tagged with `Provenance::Manual`.
//
// The polygons are measured with the same shoelace formula as automatic contours,
// filtered by their own minimum area (strict), and summarized as a single row.
// Vertex coordinates are taken to be in frame pixels; any display scaling is the
// annotation surface's business. Area is measured on the drawn sub-pixel
// vertices; only the outline kept for drawing is rounded.

use crate::core_modules::measurement::{Measurement, Provenance, SourceId};
use crate::core_modules::region::Region;

/// A closed polygon as drawn, in frame pixel coordinates.
pub type Polygon = Vec<(f64, f64)>;

pub mod manual {
    use super::*;

    /// Builds regions from drawn polygons, dropping degenerate ones and those
    /// with `area <= min_area`.
    pub fn manual_regions(polygons: &[Polygon], min_area: f64) -> Vec<Region> {
        polygons
            .iter()
            .filter_map(|polygon| Region::from_vertices(polygon))
            .filter(|region| region.area > min_area)
            .collect()
    }

    /// Measures a set of drawn polygons as one manual row.
    pub fn measure_manual_polygons(
        source: &SourceId,
        polygons: &[Polygon],
        min_area: f64,
        pixels_per_mm: f64,
        color_label: Option<String>,
    ) -> (Vec<Region>, Measurement) {
        let regions = manual_regions(polygons, min_area);
        let area: f64 = regions.iter().map(|r| r.area).sum();
        let measurement = Measurement::new(
            source,
            regions.len(),
            area,
            pixels_per_mm,
            color_label,
            Provenance::Manual,
        );
        (regions, measurement)
    }
}

#[cfg(test)]
mod tests {
    use super::manual::*;
    use super::*;

    fn rect(x: f64, y: f64, w: f64, h: f64) -> Polygon {
        vec![(x, y), (x + w, y), (x + w, y + h), (x, y + h)]
    }

    #[test]
    fn drawn_polygons_are_measured_and_tagged_manual() {
        let polygons = vec![rect(0.0, 0.0, 20.0, 10.0), rect(50.0, 50.0, 10.0, 10.0)];
        let (regions, m) = measure_manual_polygons(&SourceId::new("skin.jpg", 1), &polygons, 10.0, 10.0, None);
        assert_eq!(regions.len(), 2);
        assert_eq!(m.region_count, 2);
        assert_eq!(m.area_px, 300.0);
        assert_eq!(m.area_mm2, 3.0);
        assert_eq!(m.provenance, Provenance::Manual);
    }

    #[test]
    fn small_and_degenerate_polygons_are_dropped() {
        let polygons = vec![
            rect(0.0, 0.0, 3.0, 3.0),                // 9 px², below the bound
            rect(0.0, 0.0, 2.0, 5.0),                // exactly 10 px², strict bound drops it
            vec![(0.0, 0.0), (10.0, 10.0)],          // a stroke, not a polygon
            vec![(0.0, 0.0), (5.0, 0.0), (10.0, 0.0)], // collinear
            rect(0.0, 0.0, 4.0, 4.0),                // 16 px², kept
        ];
        let regions = manual_regions(&polygons, 10.0);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area, 16.0);
    }

    #[test]
    fn sub_pixel_strokes_keep_their_exact_area() {
        let regions = manual_regions(&[rect(0.3, 0.3, 2.4, 2.4)], 5.0);
        assert_eq!(regions.len(), 1);
        assert!((regions[0].area - 5.76).abs() < 1e-9);
        assert!((regions[0].centroid.0 - 1.5).abs() < 1e-9);
    }

    #[test]
    fn an_empty_annotation_still_produces_a_row() {
        let (_, m) = measure_manual_polygons(&SourceId::new("a", 3), &[], 10.0, 10.0, Some("Green".into()));
        assert_eq!((m.region_count, m.area_mm2, m.page), (0, 0.0, 3));
        assert_eq!(m.color_label.as_deref(), Some("Green"));
    }
}
