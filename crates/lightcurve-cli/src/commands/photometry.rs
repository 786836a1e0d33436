use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use lightcurve_core::frame::{Channel, PixelFrame, PixelPos};
use lightcurve_core::progress::{CancelToken, ProcessingStage, ProgressReporter};
use lightcurve_core::session::{run_session, TrackingMode};

use super::config::LightcurveConfig;
use crate::io::{list_images, load_frame, read_bad_pixels, read_positions, write_csv};
use crate::progress::BarReporter;
use crate::summary::{print_session_result, print_session_summary};

#[derive(Args)]
pub struct PhotometryArgs {
    /// Directory of (calibrated) frames, processed in file-name order
    pub frames: PathBuf,

    /// Target x position on the first frame
    #[arg(long)]
    pub x: f64,

    /// Target y position on the first frame
    #[arg(long)]
    pub y: f64,

    /// File of per-frame `x,y` positions; disables automatic tracking
    #[arg(long)]
    pub positions: Option<PathBuf>,

    /// Aperture radius in pixels (overrides config)
    #[arg(long)]
    pub aperture: Option<f64>,

    /// Exposure time of every frame in seconds, recorded in the output
    #[arg(long)]
    pub exposure: Option<f64>,

    /// Filter name recorded in the output
    #[arg(long)]
    pub filter: Option<String>,

    /// Config file (TOML); only the [session] section is used
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output CSV path
    #[arg(short, long, default_value = "lightcurve.csv")]
    pub output: PathBuf,
}

pub fn run(args: &PhotometryArgs) -> Result<()> {
    let mut config = LightcurveConfig::load(args.config.as_deref())?.session;
    if let Some(radius) = args.aperture {
        config.aperture.source = radius;
    }
    config.validate().context("Invalid session config")?;

    let mode = match args.positions {
        Some(ref path) => TrackingMode::Manual(read_positions(path)?),
        None => TrackingMode::Automatic,
    };
    let seed = PixelPos::new(args.x, args.y);

    let paths = list_images(&args.frames)?;
    if paths.is_empty() {
        bail!("No frames found in {}", args.frames.display());
    }
    if let TrackingMode::Manual(ref positions) = mode {
        if positions.len() < paths.len() {
            tracing::warn!(
                positions = positions.len(),
                frames = paths.len(),
                "Fewer manual positions than frames; the rest will be flagged"
            );
        }
    }
    print_session_summary(args, &config, &mode, paths.len());

    let bad_pixels = read_bad_pixels(&args.frames)?;
    if !bad_pixels.is_empty() {
        tracing::info!(pixels = bad_pixels.len(), "Loaded bad pixel list");
    }

    let reporter = BarReporter::new()?;
    reporter.begin_stage(ProcessingStage::Loading, Some(paths.len()));
    let mut frames: Vec<PixelFrame> = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let mut frame = load_frame(path, i)?;
        if args.exposure.is_some() {
            frame.metadata.exposure_s = args.exposure;
        }
        frame.metadata.filter.clone_from(&args.filter);
        frame.metadata.bad_pixels.clone_from(&bad_pixels);
        frames.push(frame);
        reporter.advance(i + 1);
    }
    reporter.finish_stage();

    let output = run_session(&frames, seed, mode, &config, &CancelToken::new(), &reporter)?;

    let channels: &[Channel] = frames[0].channels();
    reporter.begin_stage(ProcessingStage::Writing, Some(1));
    write_csv(&args.output, &output.records, channels)?;
    reporter.advance(1);
    reporter.finish_stage();
    print_session_result(&output, &args.output);

    Ok(())
}
