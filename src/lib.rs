// THEORY:
// This file is the main entry point for the `spot_vision` library crate.
// It defines the public API exposed to hosts (the bundled command-line runner,
// or any interactive front end that uploads images and draws annotations).
//
// The primary exports are `SpotPipeline` (sequential, one upload at a time),
// `ParallelPipeline` (a tokio worker pool with ordered commits), the
// caller-owned `MeasurementLedger`, and the validated `PipelineConfig`. The
// image-processing stages live in `core_modules` and can be used on their own.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::PipelineConfig;
pub use core_modules::measurement::{LedgerSnapshot, Measurement, MeasurementLedger, Provenance, RunningTotals, SourceId};
pub use error::{Result, SpotError};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{FileOutcome, FrameAnalysis, SpotPipeline, Upload, analyze_frame};
