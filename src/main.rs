//! Command-line entry point for qscope.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, LevelFilter};
use qscope::acquisition::{Coordinator, HardwareAcquisition, ProcessAcquisition};
use qscope::config::Settings;
use qscope::device::mock::{MockScanDevice, MockStage};
use qscope::frame::Frame;
use qscope::plan::{RasterPlan, ScanRegion, ScanSpec, ZSweep};
use qscope::scanfile::{self, ScanFileName};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser)]
#[command(name = "qscope", about = "Galvo raster scanning and photon-counting acquisition")]
struct Cli {
    /// Configuration file (defaults to qscope.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Synthetic device pair, no hardware required
    Mock,
    /// External scanner process from the [scanner] settings
    Process,
}

#[derive(Subcommand)]
enum Command {
    /// Print the sampling plan for a scan without running it
    Plan {
        #[arg(long, default_value_t = 100)]
        pixels: u32,
        #[arg(long, default_value_t = 1.0)]
        dwell_ms: f64,
    },
    /// Run a scan and autosave the resulting frame
    Scan {
        #[arg(long, value_enum, default_value_t = Backend::Mock)]
        backend: Backend,
        #[arg(long, default_value_t = 1.0)]
        x_start: f64,
        #[arg(long, default_value_t = 1.0)]
        y_start: f64,
        #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
        x_end: f64,
        #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
        y_end: f64,
        #[arg(long, default_value_t = 100)]
        pixels: u32,
        #[arg(long, default_value_t = 1.0)]
        dwell_ms: f64,
        /// First z plane; enables a volumetric sweep
        #[arg(long, requires = "z_stop", allow_hyphen_values = true)]
        z_start: Option<f64>,
        #[arg(long, default_value_t = 0.1)]
        z_increment: f64,
        #[arg(long, requires = "z_start", allow_hyphen_values = true)]
        z_stop: Option<f64>,
    },
    /// Inspect a saved scan file
    Decode {
        file: PathBuf,
        /// Emit the filename metadata as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    init_logging(&settings);

    match cli.command {
        Command::Plan { pixels, dwell_ms } => {
            let spec = ScanSpec {
                region: ScanRegion::centered(1.0, 0.0, 0.0),
                pixels,
                dwell_ms,
                z_sweep: None,
            };
            let plan = RasterPlan::compute(&spec, &settings.limits())?;
            println!("sample rate:      {:.1} Hz", plan.sample_rate_hz);
            println!("actual dwell:     {:.1} us", plan.actual_dwell().as_secs_f64() * 1e6);
            println!("settling samples: {} per line", plan.settling_samples);
            println!("samples per line: {}", plan.samples_per_line);
            println!("total samples:    {}", plan.total_samples);
            println!("frame duration:   {:.1} ms", plan.frame_duration().as_secs_f64() * 1e3);
            Ok(())
        }
        Command::Scan {
            backend,
            x_start,
            y_start,
            x_end,
            y_end,
            pixels,
            dwell_ms,
            z_start,
            z_increment,
            z_stop,
        } => {
            let z_sweep = match (z_start, z_stop) {
                (Some(start), Some(stop)) => Some(ZSweep {
                    start,
                    increment: z_increment,
                    stop,
                }),
                _ => None,
            };
            let spec = ScanSpec {
                region: ScanRegion {
                    x_start,
                    y_start,
                    x_end,
                    y_end,
                },
                pixels,
                dwell_ms,
                z_sweep,
            };
            match backend {
                Backend::Mock => {
                    let (output, counter) = MockScanDevice::new().into_tasks();
                    let backend =
                        HardwareAcquisition::new(output, counter, settings.hardware.clone());
                    let coordinator = Coordinator::new(backend, settings.limits());
                    run_scan(coordinator, &settings, &spec).await
                }
                Backend::Process => {
                    let backend = ProcessAcquisition::new(settings.scanner.clone());
                    let coordinator = Coordinator::new(backend, settings.limits());
                    run_scan(coordinator, &settings, &spec).await
                }
            }
        }
        Command::Decode { file, json } => decode(&file, json),
    }
}

async fn run_scan<B: qscope::acquisition::AcquisitionBackend>(
    mut coordinator: Coordinator<B>,
    settings: &Settings,
    spec: &ScanSpec,
) -> Result<()> {
    // progress snapshots to the log while the scan is in flight
    let mut progress_rx = coordinator.subscribe_progress();
    let reporter = tokio::spawn(async move {
        while progress_rx.changed().await.is_ok() {
            let snapshot = *progress_rx.borrow_and_update();
            if snapshot.expected_lines.is_some() {
                info!(
                    "progress: {:5.1}% ({} lines)",
                    snapshot.fraction * 100.0,
                    snapshot.decoded_lines
                );
            }
        }
    });

    let result = if spec.z_sweep.is_some() {
        let mut stage = MockStage::new();
        coordinator
            .scan_volume(spec, &mut stage, settings.stage.move_timeout, |frame| {
                report_frame(frame, settings)
            })
            .await
            .map(|_| ())
    } else {
        let frame = coordinator.scan(spec).await;
        frame.and_then(|frame| report_frame(&frame, settings))
    };
    reporter.abort();
    result?;
    Ok(())
}

fn report_frame(frame: &Frame, settings: &Settings) -> qscope::error::ScanResult<()> {
    let path = scanfile::autosave(frame, &settings.storage.output_dir, &settings.storage.prefix)?;
    let (min, max) = frame.original().intensity_range();
    println!(
        "saved {} ({}x{}, intensity {:.0}..{:.0})",
        path.display(),
        frame.original().rows(),
        frame.original().cols(),
        min,
        max
    );
    Ok(())
}

fn decode(file: &PathBuf, json: bool) -> Result<()> {
    let grid = scanfile::read_grid(file)?;
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(ScanFileName::parse);

    if json {
        let metadata = serde_json::json!({
            "filename": name,
            "rows": grid.rows(),
            "cols": grid.cols(),
        });
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!("grid: {}x{}", grid.rows(), grid.cols());
    let (min, max) = grid.intensity_range();
    println!("intensity: {min:.3}..{max:.3}");
    match name {
        Some(meta) => {
            println!(
                "scan: prefix '{}', step {}, dwell {} ms, acquired {}",
                meta.prefix, meta.step, meta.dwell_ms, meta.timestamp
            );
            if let Some(z) = meta.z {
                println!("z plane: {z}");
            }
        }
        None => println!("filename does not follow the scan naming scheme"),
    }
    Ok(())
}

fn init_logging(settings: &Settings) {
    let level = LevelFilter::from_str(&settings.application.log_level).unwrap_or(LevelFilter::Info);
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .try_init();
}
