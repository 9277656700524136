// THEORY:
// The `pipeline` module is the top-level API of the spot engine. It wires the
// stages together in their fixed order:
//
//   frame extractor -> contrast normalizer (optional) -> color segmenter
//     -> region extractor -> spatial grouper (optional) -> measurement
//
// `analyze_frame` is a pure function of (frame, config, source): it returns the
// measurement rows and an overlay image and touches nothing else. Upload-level
// helpers add the two pieces of policy the core owns:
// - a file whose container or any page fails to decode contributes no rows at all
//   and is reported as `FileOutcome::Failed`; the batch carries on,
// - rows of a successful file are committed to the caller's ledger in page order.
//
// The configuration is validated once, when the pipeline is built, so an invalid
// snapshot stops an invocation before a single byte is decoded.

use crate::config::PipelineConfig;
use crate::core_modules::color_segmenter::color_segmenter;
use crate::core_modules::contrast::contrast;
use crate::core_modules::frame_extractor::{Frame, frame_extractor};
use crate::core_modules::manual::{Polygon, manual};
use crate::core_modules::measurement::{Measurement, MeasurementLedger, Provenance, SourceId};
use crate::core_modules::overlay::{MERGED_COLOR, REGION_COLOR, overlay};
use crate::core_modules::region::Region;
use crate::core_modules::region_extractor::region_extractor;
use crate::core_modules::spatial_grouper::{Grouping, spatial_grouper};
use crate::error::{Result, SpotError};
use std::borrow::Borrow;
use tracing::{debug, info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::color_segmenter::{ColorClass, ColorRange, Mask};
pub use crate::core_modules::measurement::{LedgerSnapshot, RunningTotals};
pub use crate::core_modules::region::{MergedRegion, Point};

/// Raw bytes of one uploaded file plus its display name.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// Detections for one color range within one frame.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Class label in color-class mode, `None` for the single configured range.
    pub label: Option<String>,
    /// Regions that passed the area filter.
    pub regions: Vec<Region>,
    /// Present when grouping is enabled.
    pub grouping: Option<Grouping>,
}

impl Detection {
    /// Spots as reported: clusters when grouping is on, raw regions otherwise.
    pub fn count(&self) -> usize {
        match &self.grouping {
            Some(grouping) => grouping.cluster_count(),
            None => self.regions.len(),
        }
    }

    /// Reported area in pixel², matching `count`.
    pub fn area_px(&self) -> f64 {
        match &self.grouping {
            Some(grouping) => grouping.total_area(),
            None => region_extractor::total_area(&self.regions),
        }
    }
}

/// Everything the pipeline derives from one frame.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub source: SourceId,
    pub detections: Vec<Detection>,
    /// One row per detection, in detection order.
    pub measurements: Vec<Measurement>,
    /// The analyzed frame with detected outlines drawn on it.
    pub overlay: Frame,
}

/// The per-file result of running an upload through the pipeline.
#[derive(Debug)]
pub enum FileOutcome {
    Processed {
        file_name: String,
        frames: Vec<FrameAnalysis>,
    },
    Failed {
        file_name: String,
        error: SpotError,
    },
}

impl FileOutcome {
    pub fn file_name(&self) -> &str {
        match self {
            FileOutcome::Processed { file_name, .. } | FileOutcome::Failed { file_name, .. } => file_name,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FileOutcome::Failed { .. })
    }

    /// Rows this outcome contributes to the ledger (none for a failed file).
    pub fn measurements(&self) -> Vec<Measurement> {
        match self {
            FileOutcome::Processed { frames, .. } => {
                frames.iter().flat_map(|f| f.measurements.iter().cloned()).collect()
            }
            FileOutcome::Failed { .. } => Vec::new(),
        }
    }
}

/// Runs one detection pass over `frame` for a single range.
fn detect(frame_mask: &Mask, config: &PipelineConfig, label: Option<String>) -> Detection {
    let regions = region_extractor::extract_regions(frame_mask, &config.area);
    let grouping = config
        .merge_radius
        .map(|radius| spatial_grouper::group_regions(&regions, radius));
    Detection {
        label,
        regions,
        grouping,
    }
}

/// Analyzes one frame. Pure: the same inputs always give the same rows and overlay.
pub fn analyze_frame(frame: &Frame, config: &PipelineConfig, source: &SourceId) -> FrameAnalysis {
    let prepared = if config.contrast.is_identity() {
        frame.clone()
    } else {
        contrast::normalize(frame, &config.contrast)
    };

    let detections: Vec<Detection> = if config.uses_color_classes() {
        color_segmenter::segment_classes(&prepared, &config.color_classes)
            .into_iter()
            .map(|(label, mask)| detect(&mask, config, Some(label.to_string())))
            .collect()
    } else {
        let mask = color_segmenter::segment(&prepared, &config.color_range);
        vec![detect(&mask, config, None)]
    };

    let measurements: Vec<Measurement> = detections
        .iter()
        .map(|d| {
            Measurement::new(
                source,
                d.count(),
                d.area_px(),
                config.pixels_per_mm,
                d.label.clone(),
                Provenance::Automatic,
            )
        })
        .collect();

    let mut overlay = prepared;
    for detection in &detections {
        for region in &detection.regions {
            overlay::draw_outline_mut(&mut overlay, &region.points, REGION_COLOR);
        }
        if let Some(grouping) = &detection.grouping {
            for merged in grouping.merged.iter().filter(|m| m.member_count > 1) {
                overlay::draw_outline_mut(&mut overlay, &merged.hull, MERGED_COLOR);
            }
        }
    }

    for m in &measurements {
        debug!(
            file_name = %m.file_name,
            page = m.page,
            label = m.color_label.as_deref().unwrap_or("-"),
            regions = m.region_count,
            area_mm2 = m.area_mm2,
            "frame analyzed"
        );
    }

    FrameAnalysis {
        source: source.clone(),
        detections,
        measurements,
        overlay,
    }
}

/// The main entry point for the spot engine, bound to one validated configuration.
#[derive(Debug, Clone)]
pub struct SpotPipeline {
    config: PipelineConfig,
}

impl SpotPipeline {
    /// Validates `config` and builds the pipeline. Fails with a configuration
    /// error before anything is processed.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn analyze_frame(&self, frame: &Frame, source: &SourceId) -> FrameAnalysis {
        analyze_frame(frame, &self.config, source)
    }

    /// Decodes and analyzes every page of an upload. Pages are numbered from 1.
    pub fn analyze_upload(&self, upload: &Upload) -> Result<Vec<FrameAnalysis>> {
        let frames = frame_extractor::extract_frames(&upload.file_name, &upload.bytes)?;
        let mut analyses = Vec::new();
        for (index, frame) in frames.enumerate() {
            let frame = frame?;
            let source = SourceId::new(upload.file_name.clone(), index as u32 + 1);
            analyses.push(self.analyze_frame(&frame, &source));
        }
        info!(file_name = %upload.file_name, pages = analyses.len(), "upload analyzed");
        Ok(analyses)
    }

    /// Analyzes an upload without touching any ledger, folding errors into the outcome.
    pub fn evaluate_upload(&self, upload: &Upload) -> FileOutcome {
        match self.analyze_upload(upload) {
            Ok(frames) => FileOutcome::Processed {
                file_name: upload.file_name.clone(),
                frames,
            },
            Err(error) => {
                warn!(file_name = %upload.file_name, %error, "skipping file");
                FileOutcome::Failed {
                    file_name: upload.file_name.clone(),
                    error,
                }
            }
        }
    }

    /// Analyzes an upload and commits its rows to `ledger` if every page decoded.
    pub fn process_upload(&self, upload: &Upload, ledger: &MeasurementLedger) -> FileOutcome {
        let outcome = self.evaluate_upload(upload);
        ledger.append_all(outcome.measurements());
        outcome
    }

    /// Processes uploads one after another. A failed file never stops the batch.
    pub fn process_batch<'a>(
        &self,
        uploads: impl IntoIterator<Item = &'a Upload>,
        ledger: &MeasurementLedger,
    ) -> Vec<FileOutcome> {
        let mut outcomes = Vec::new();
        self.process_batch_with(uploads, ledger, |outcome| outcomes.push(outcome));
        outcomes
    }

    /// Streaming form of [`SpotPipeline::process_batch`]. Each outcome is handed
    /// to `on_outcome` as soon as its rows are committed, and the next upload is
    /// pulled only afterwards, so at most one file's frames are alive at a time.
    pub fn process_batch_with<U: Borrow<Upload>>(
        &self,
        uploads: impl IntoIterator<Item = U>,
        ledger: &MeasurementLedger,
        mut on_outcome: impl FnMut(FileOutcome),
    ) {
        for upload in uploads {
            on_outcome(self.process_upload(upload.borrow(), ledger));
        }
    }

    /// Measures human-drawn polygons for a frame and commits the manual row.
    pub fn record_manual(
        &self,
        source: &SourceId,
        polygons: &[Polygon],
        color_label: Option<String>,
        ledger: &MeasurementLedger,
    ) -> Measurement {
        let (_, measurement) = manual::measure_manual_polygons(
            source,
            polygons,
            self.config.manual_min_area,
            self.config.pixels_per_mm,
            color_label,
        );
        ledger.append(measurement.clone());
        measurement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::region_extractor::{AreaFilter, LowerBound};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(frame: &RgbImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(frame.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn red_config() -> PipelineConfig {
        PipelineConfig {
            color_range: ColorRange::new(0, 10, 100, 100).unwrap(),
            ..PipelineConfig::default()
        }
    }

    /// Black canvas with red squares at the given (x, y, side).
    fn spots(width: u32, height: u32, squares: &[(u32, u32, u32)]) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let inside = squares
                .iter()
                .any(|&(sx, sy, s)| x >= sx && x < sx + s && y >= sy && y < sy + s);
            if inside { Rgb([255, 0, 0]) } else { Rgb([0, 0, 0]) }
        })
    }

    #[test]
    fn solid_red_frame_is_one_region_of_about_one_hundred_mm2() {
        let frame = RgbImage::from_pixel(100, 100, Rgb([255, 0, 0]));
        let config = PipelineConfig {
            area: AreaFilter::new(50.0, None, LowerBound::Strict),
            pixels_per_mm: 10.0,
            ..red_config()
        };
        let analysis = analyze_frame(&frame, &config, &SourceId::new("red.png", 1));

        assert_eq!(analysis.detections[0].regions.len(), 1);
        let m = &analysis.measurements[0];
        assert_eq!(m.region_count, 1);
        assert!((m.area_px - 10_000.0).abs() <= 200.0, "area_px={}", m.area_px);
        assert!((m.area_mm2 - 100.0).abs() <= 2.0, "area_mm2={}", m.area_mm2);
        assert_eq!(m.provenance, Provenance::Automatic);
        assert_eq!(analysis.overlay.dimensions(), (100, 100));
    }

    #[test]
    fn frame_without_qualifying_pixels_still_yields_a_zero_row() {
        let frame = RgbImage::from_pixel(40, 40, Rgb([0, 0, 255]));
        let ledger = MeasurementLedger::new();
        let pipeline = SpotPipeline::new(red_config()).unwrap();
        let analysis = pipeline.analyze_frame(&frame, &SourceId::new("blue.png", 1));
        ledger.append_all(analysis.measurements.clone());

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.measurements.len(), 1);
        assert_eq!(snapshot.measurements[0].region_count, 0);
        assert_eq!(snapshot.measurements[0].area_mm2, 0.0);
        assert_eq!(snapshot.totals, RunningTotals::default());
        assert_eq!(analysis.overlay, frame);
    }

    #[test]
    fn analysis_is_deterministic() {
        let frame = spots(120, 80, &[(5, 5, 12), (40, 10, 9), (70, 50, 20)]);
        let config = PipelineConfig {
            merge_radius: Some(30.0),
            ..red_config()
        };
        let source = SourceId::new("a.png", 1);
        let first = analyze_frame(&frame, &config, &source);
        let second = analyze_frame(&frame, &config, &source);
        assert_eq!(first.measurements, second.measurements);
        assert_eq!(first.overlay, second.overlay);
    }

    #[test]
    fn grouping_reports_clusters_instead_of_fragments() {
        // Two fragments 14 px apart and one distant spot.
        let frame = spots(150, 60, &[(10, 10, 10), (24, 10, 10), (110, 30, 15)]);
        let ungrouped = analyze_frame(&frame, &red_config(), &SourceId::new("g.png", 1));
        assert_eq!(ungrouped.measurements[0].region_count, 3);

        let config = PipelineConfig {
            merge_radius: Some(20.0),
            ..red_config()
        };
        let grouped = analyze_frame(&frame, &config, &SourceId::new("g.png", 1));
        let detection = &grouped.detections[0];
        assert_eq!(grouped.measurements[0].region_count, 2);
        assert_eq!(detection.regions.len(), 3);
        let mut members = detection.grouping.as_ref().unwrap().member_counts();
        members.sort_unstable();
        assert_eq!(members, vec![1, 2]);
        assert!(grouped.measurements[0].area_px >= ungrouped.measurements[0].area_px);
    }

    #[test]
    fn color_classes_produce_one_labelled_row_each() {
        let frame = RgbImage::from_fn(60, 30, |x, _| match x {
            2..=19 => Rgb([255, 0, 0]),
            30..=55 => Rgb([0, 200, 0]),
            _ => Rgb([0, 0, 0]),
        });
        let config = PipelineConfig {
            color_classes: vec![
                ColorClass::new("Red", ColorRange::new(0, 10, 100, 100).unwrap()),
                ColorClass::new("Green", ColorRange::new(50, 70, 100, 100).unwrap()),
                ColorClass::new("Blue", ColorRange::new(110, 130, 100, 100).unwrap()),
            ],
            ..PipelineConfig::default()
        };
        let analysis = analyze_frame(&frame, &config, &SourceId::new("c.png", 1));
        let rows: Vec<(Option<&str>, usize)> = analysis
            .measurements
            .iter()
            .map(|m| (m.color_label.as_deref(), m.region_count))
            .collect();
        assert_eq!(rows, vec![(Some("Red"), 1), (Some("Green"), 1), (Some("Blue"), 0)]);
    }

    #[test]
    fn contrast_normalization_runs_before_segmentation() {
        // A dim red (value 60) is below the value threshold until contrast lifts it.
        let dim = RgbImage::from_fn(50, 50, |x, y| {
            let inside = (10..30).contains(&x) && (10..30).contains(&y);
            if inside { Rgb([60, 0, 0]) } else { Rgb([0, 0, 0]) }
        });
        let mut config = red_config();
        assert_eq!(analyze_frame(&dim, &config, &SourceId::new("d", 1)).measurements[0].region_count, 0);
        config.contrast.contrast = 2.5;
        assert_eq!(analyze_frame(&dim, &config, &SourceId::new("d", 1)).measurements[0].region_count, 1);
    }

    #[test]
    fn invalid_configuration_stops_before_processing() {
        let config = PipelineConfig {
            pixels_per_mm: 0.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(SpotPipeline::new(config), Err(SpotError::Configuration { .. })));
    }

    #[test]
    fn a_broken_file_is_skipped_and_the_batch_continues() {
        let pipeline = SpotPipeline::new(red_config()).unwrap();
        let ledger = MeasurementLedger::new();
        let uploads = vec![
            Upload::new("first.png", png_bytes(&spots(40, 40, &[(5, 5, 10)]))),
            Upload::new("broken.png", b"\x89PNG\r\n\x1a\nthis is not really a png".to_vec()),
            Upload::new("third.png", png_bytes(&spots(40, 40, &[(5, 5, 10), (25, 25, 10)]))),
        ];

        let outcomes = pipeline.process_batch(&uploads, &ledger);
        assert_eq!(outcomes.len(), 3);
        assert!(!outcomes[0].is_failed());
        assert!(outcomes[1].is_failed());
        assert_eq!(outcomes[1].file_name(), "broken.png");
        assert!(!outcomes[2].is_failed());

        let snapshot = ledger.snapshot();
        let files: Vec<&str> = snapshot.measurements.iter().map(|m| m.file_name.as_str()).collect();
        assert_eq!(files, vec!["first.png", "third.png"]);
        assert_eq!(snapshot.totals.region_count, 3);
    }

    #[test]
    fn multi_page_uploads_are_numbered_from_one() {
        use tiff::encoder::{TiffEncoder, colortype};

        let mut bytes = Vec::new();
        {
            let mut encoder = TiffEncoder::new(Cursor::new(&mut bytes)).unwrap();
            for squares in [vec![(2u32, 2u32, 10u32)], vec![(2, 2, 10), (20, 20, 10)]] {
                let page = spots(40, 40, &squares);
                encoder.write_image::<colortype::RGB8>(40, 40, page.as_raw()).unwrap();
            }
        }

        let pipeline = SpotPipeline::new(PipelineConfig {
            color_range: ColorRange::new(0, 10, 100, 100).unwrap(),
            area: AreaFilter::new(20.0, None, LowerBound::Strict),
            ..PipelineConfig::default()
        })
        .unwrap();
        let ledger = MeasurementLedger::new();
        let outcome = pipeline.process_upload(&Upload::new("stack.tif", bytes), &ledger);
        assert!(!outcome.is_failed());

        let rows = ledger.snapshot().measurements;
        let pages: Vec<(u32, usize)> = rows.iter().map(|m| (m.page, m.region_count)).collect();
        assert_eq!(pages, vec![(1, 1), (2, 2)]);
    }

    #[test]
    fn streamed_batches_hand_off_each_file_before_reading_the_next() {
        use std::cell::RefCell;

        let pipeline = SpotPipeline::new(red_config()).unwrap();
        let ledger = MeasurementLedger::new();
        let events = RefCell::new(Vec::new());
        let uploads = ["a.png", "broken.png", "c.png"].into_iter().map(|name| {
            events.borrow_mut().push(format!("read {name}"));
            if name == "broken.png" {
                Upload::new(name, b"nope".to_vec())
            } else {
                Upload::new(name, png_bytes(&spots(30, 30, &[(5, 5, 12)])))
            }
        });

        pipeline.process_batch_with(uploads, &ledger, |outcome| {
            let rows_so_far = ledger.len();
            events
                .borrow_mut()
                .push(format!("done {} ({rows_so_far} rows)", outcome.file_name()));
        });

        assert_eq!(
            events.into_inner(),
            vec![
                "read a.png",
                "done a.png (1 rows)",
                "read broken.png",
                "done broken.png (1 rows)",
                "read c.png",
                "done c.png (2 rows)",
            ]
        );
    }

    #[test]
    fn manual_rows_bypass_segmentation() {
        let pipeline = SpotPipeline::new(PipelineConfig::default()).unwrap();
        let ledger = MeasurementLedger::new();
        let square: Polygon = vec![(0.0, 0.0), (30.0, 0.0), (30.0, 30.0), (0.0, 30.0)];
        let m = pipeline.record_manual(&SourceId::new("hand.png", 1), &[square], None, &ledger);
        assert_eq!(m.provenance, Provenance::Manual);
        assert_eq!(m.area_mm2, 9.0);
        assert_eq!(ledger.totals().region_count, 1);
    }
}
