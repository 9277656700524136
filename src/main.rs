// Command-line runner for the `spot_vision` library.
//
// Reads each input file, runs it through the pipeline, and prints one JSON line
// per measurement followed by a totals line. Files that cannot be read or decoded
// are reported on stderr; the rest of the batch is still measured. Files are read
// only when the pipeline is ready for them, and each outcome (overlays included)
// is dropped as soon as it has been reported.

use clap::Parser;
use spot_vision::core_modules::utils::image_helper::image_helper;
use spot_vision::{FileOutcome, MeasurementLedger, ParallelPipeline, PipelineConfig, SpotError, SpotPipeline, Upload};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "spot_vision")]
#[command(about = "Detect and measure colored spots in images")]
#[command(version)]
struct Args {
    /// Settings file (TOML, JSON or YAML). `SPOT_*` environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a contour overlay PNG for every analyzed page into this directory.
    #[arg(short, long)]
    overlay_dir: Option<PathBuf>,

    /// Analyze files concurrently on a worker pool.
    #[arg(short, long)]
    parallel: bool,

    /// Worker count for `--parallel` (defaults to the number of CPUs).
    #[arg(short, long, requires = "parallel")]
    workers: Option<usize>,

    /// Image files to analyze.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn read_upload(path: &Path) -> Option<Upload> {
    match std::fs::read(path) {
        Ok(bytes) => Some(Upload::new(display_name(path), bytes)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read file");
            eprintln!("Could not read `{}`: {e}", path.display());
            None
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn write_overlays(dir: &Path, outcome: &FileOutcome) -> spot_vision::Result<()> {
    if let FileOutcome::Processed { file_name, frames } = outcome {
        for frame in frames {
            let path = image_helper::overlay_path(dir, file_name, frame.source.page);
            image_helper::save_png(&path, &frame.overlay)?;
            info!(path = %path.display(), "overlay written");
        }
    }
    Ok(())
}

/// Reports one finished file. Returns `false` when it failed.
fn handle_outcome(outcome: FileOutcome, overlay_dir: Option<&Path>) -> spot_vision::Result<bool> {
    if let FileOutcome::Failed { error, .. } = &outcome {
        eprintln!("{}", error.user_message());
        return Ok(false);
    }
    if let Some(dir) = overlay_dir {
        write_overlays(dir, &outcome)?;
    }
    Ok(true)
}

async fn run(args: Args) -> spot_vision::Result<bool> {
    let config = PipelineConfig::load(args.config.as_deref())?;
    let pixels_per_mm = config.pixels_per_mm;
    let ledger = Arc::new(MeasurementLedger::new());

    if let Some(dir) = &args.overlay_dir {
        std::fs::create_dir_all(dir)?;
    }
    let overlay_dir = args.overlay_dir.as_deref();
    info!(files = args.files.len(), parallel = args.parallel, "starting analysis");

    let mut unreadable = 0;
    let uploads = args.files.iter().filter_map(|path| {
        let upload = read_upload(path);
        if upload.is_none() {
            unreadable += 1;
        }
        upload
    });

    let mut failed = 0;
    let mut write_error = None;
    let mut on_outcome = |outcome: FileOutcome| {
        if write_error.is_some() {
            return;
        }
        match handle_outcome(outcome, overlay_dir) {
            Ok(true) => {}
            Ok(false) => failed += 1,
            Err(e) => write_error = Some(e),
        }
    };

    if args.parallel {
        let workers = args.workers.unwrap_or_else(num_cpus::get);
        let parallel = ParallelPipeline::with_workers(config, Arc::clone(&ledger), workers)?;
        parallel.process_batch_with(uploads, &mut on_outcome).await?;
        parallel.shutdown().await;
    } else {
        SpotPipeline::new(config)?.process_batch_with(uploads, &ledger, &mut on_outcome);
    }
    if let Some(e) = write_error {
        return Err(e);
    }
    let failed = failed + unreadable;

    let snapshot = ledger.snapshot();
    for measurement in &snapshot.measurements {
        println!("{}", serde_json::to_string(measurement)?);
    }
    println!(
        "{}",
        serde_json::json!({
            "total_region_count": snapshot.totals.region_count,
            "total_area_mm2": snapshot.totals.area_mm2(pixels_per_mm),
        })
    );

    info!(rows = snapshot.measurements.len(), failed, "analysis finished");
    Ok(failed == 0)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(error = %e, "analysis aborted");
            if matches!(e, SpotError::Configuration { .. } | SpotError::ConfigLoad(_)) {
                eprintln!("{}", e.user_message());
            } else {
                eprintln!("{e}");
            }
            ExitCode::from(2)
        }
    }
}
