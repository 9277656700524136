// Contour overlays for visual inspection of a frame's detections.

use crate::core_modules::frame_extractor::Frame;
use crate::core_modules::region::Point;
use image::Rgb;
use imageproc::drawing::draw_line_segment_mut;

pub const REGION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const MERGED_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// Stroke width in pixels.
const THICKNESS: i32 = 2;

pub mod overlay {
    use super::*;

    /// Draws the closed outline of `points` onto `canvas`.
    pub fn draw_outline_mut(canvas: &mut Frame, points: &[Point], color: Rgb<u8>) {
        if points.is_empty() {
            return;
        }
        for offset in 0..THICKNESS {
            for (i, p) in points.iter().enumerate() {
                let q = points[(i + 1) % points.len()];
                for (dx, dy) in [(offset, 0), (0, offset)] {
                    let start = ((p.x + dx) as f32, (p.y + dy) as f32);
                    let end = ((q.x + dx) as f32, (q.y + dy) as f32);
                    draw_line_segment_mut(canvas, start, end, color);
                }
            }
        }
    }

    /// Copies `frame` and outlines every polygon on the copy.
    pub fn draw_outlines<'a>(
        frame: &Frame,
        outlines: impl IntoIterator<Item = &'a [Point]>,
        color: Rgb<u8>,
    ) -> Frame {
        let mut canvas = frame.clone();
        for outline in outlines {
            draw_outline_mut(&mut canvas, outline, color);
        }
        canvas
    }
}
