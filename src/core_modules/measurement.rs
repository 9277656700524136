// THEORY:
// The `measurement` module is the final layer of the spot engine. It turns the
// per-frame geometry into the narrative a user actually reads: one row per frame
// (or per color class, or per manual annotation) plus running totals across the
// whole run.
//
// Key architectural principles:
// 1.  **Rows Are Facts**: A `Measurement` is built once and never edited. The
//     ledger only appends, reads, or resets.
// 2.  **Pixels Inside, Millimetres Outside**: Running totals accumulate raw pixel²
//     and are converted only when read. Rows carry both the unrounded pixel area
//     and the 2-decimal mm² figure, so summing rounded rows never feeds back into
//     the totals.
// 3.  **Caller-Owned State**: The `MeasurementLedger` is an ordinary value passed
//     into the pipeline. Two ledgers never interfere, which keeps tests isolated.
// 4.  **One Lock**: Log and totals sit behind a single mutex. Appending a row with
//     its totals increment is one critical section, and so is a reset, so a reset
//     can never land in the middle of an append.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Where a measurement's regions came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    Automatic,
    Manual,
}

/// Identifies the frame a measurement describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId {
    pub file_name: String,
    /// 1-based page index within the file.
    pub page: u32,
}

impl SourceId {
    pub fn new(file_name: impl Into<String>, page: u32) -> Self {
        Self {
            file_name: file_name.into(),
            page,
        }
    }
}

/// Rounds to two decimal places for display and export.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Converts an area in pixel² to mm² for the given scale.
pub fn pixels_to_mm2(area_px: f64, pixels_per_mm: f64) -> f64 {
    area_px / (pixels_per_mm * pixels_per_mm)
}

/// One result row. Export only: the pixel area is not serialized, so rows are
/// never read back into a ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub file_name: String,
    pub page: u32,
    pub region_count: usize,
    /// Area in mm², rounded to two decimals.
    pub area_mm2: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_label: Option<String>,
    pub provenance: Provenance,
    /// Unrounded area in pixel²; this is what feeds the running totals.
    #[serde(skip)]
    pub area_px: f64,
}

impl Measurement {
    pub fn new(
        source: &SourceId,
        region_count: usize,
        area_px: f64,
        pixels_per_mm: f64,
        color_label: Option<String>,
        provenance: Provenance,
    ) -> Self {
        Self {
            file_name: source.file_name.clone(),
            page: source.page,
            region_count,
            area_mm2: round2(pixels_to_mm2(area_px, pixels_per_mm)),
            color_label,
            provenance,
            area_px,
        }
    }

    /// Unrounded area in mm².
    pub fn area_mm2_exact(&self, pixels_per_mm: f64) -> f64 {
        pixels_to_mm2(self.area_px, pixels_per_mm)
    }
}

/// Run-wide counters, increased by every appended measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningTotals {
    pub region_count: u64,
    pub pixel_area: f64,
}

impl RunningTotals {
    fn add(&mut self, measurement: &Measurement) {
        self.region_count += measurement.region_count as u64;
        self.pixel_area += measurement.area_px;
    }

    pub fn area_mm2(&self, pixels_per_mm: f64) -> f64 {
        round2(pixels_to_mm2(self.pixel_area, pixels_per_mm))
    }
}

/// A consistent copy of the ledger at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerSnapshot {
    pub measurements: Vec<Measurement>,
    pub totals: RunningTotals,
}

#[derive(Debug, Default)]
struct LedgerState {
    measurements: Vec<Measurement>,
    totals: RunningTotals,
}

/// The caller-owned, append-only log of measurements plus running totals.
#[derive(Debug, Default)]
pub struct MeasurementLedger {
    state: Mutex<LedgerState>,
}

impl MeasurementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // Rows are appended whole, so a poisoned lock still guards consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, measurement: Measurement) {
        let mut state = self.lock();
        state.totals.add(&measurement);
        state.measurements.push(measurement);
    }

    /// Appends all rows of one file in a single critical section, so rows of
    /// different files never interleave.
    pub fn append_all(&self, measurements: impl IntoIterator<Item = Measurement>) {
        let mut state = self.lock();
        for measurement in measurements {
            state.totals.add(&measurement);
            state.measurements.push(measurement);
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.lock();
        LedgerSnapshot {
            measurements: state.measurements.clone(),
            totals: state.totals,
        }
    }

    pub fn totals(&self) -> RunningTotals {
        self.lock().totals
    }

    pub fn len(&self) -> usize {
        self.lock().measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears the log and zeroes the totals.
    pub fn reset(&self) {
        let mut state = self.lock();
        let dropped = state.measurements.len();
        *state = LedgerState::default();
        info!(dropped, "measurement ledger reset");
    }
}
