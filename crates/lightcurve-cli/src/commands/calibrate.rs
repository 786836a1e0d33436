use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use lightcurve_core::calibration::{
    build_master_with, CalibrationMasters, CalibrationRole, Calibrator, MasterFrame,
};
use lightcurve_core::config::CalibrationConfig;
use lightcurve_core::frame::PixelFrame;
use lightcurve_core::progress::{ProcessingStage, ProgressReporter};
use tracing::{info, warn};

use super::config::LightcurveConfig;
use crate::io::{list_images, load_dir, load_frame, save_frame, write_bad_pixels, BAD_PIXELS_FILE};
use crate::progress::BarReporter;
use crate::summary::{print_calibration_result, print_calibration_summary, print_masters};

#[derive(Args)]
pub struct CalibrateArgs {
    /// Directory of light frames to calibrate
    pub lights: PathBuf,

    /// Directory of bias frames
    #[arg(long)]
    pub bias: Option<PathBuf>,

    /// Directory of dark frames
    #[arg(long)]
    pub dark: Option<PathBuf>,

    /// Directory of flat frames
    #[arg(long)]
    pub flat: Option<PathBuf>,

    /// Directory of dark frames taken with the flat exposure
    #[arg(long)]
    pub dark_flat: Option<PathBuf>,

    /// Exposure time of the lights in seconds (for exposure-ratio dark scaling)
    #[arg(long)]
    pub exposure: Option<f64>,

    /// Exposure time of the darks in seconds
    #[arg(long)]
    pub dark_exposure: Option<f64>,

    /// Config file (TOML); only the [calibration] section is used
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the combined masters next to the calibrated frames
    #[arg(long)]
    pub save_masters: bool,

    /// Output directory
    #[arg(short, long, default_value = "calibrated")]
    pub output: PathBuf,
}

pub fn run(args: &CalibrateArgs) -> Result<()> {
    let config = LightcurveConfig::load(args.config.as_deref())?.calibration;
    let lights = list_images(&args.lights)?;
    if lights.is_empty() {
        bail!("No light frames found in {}", args.lights.display());
    }
    print_calibration_summary(args, &config, lights.len());

    let reporter = BarReporter::new()?;
    let bias = combine_dir(args.bias.as_deref(), CalibrationRole::Bias, &config, None, None, &reporter)?;
    let dark = combine_dir(
        args.dark.as_deref(),
        CalibrationRole::Dark,
        &config,
        bias.as_ref(),
        args.dark_exposure,
        &reporter,
    )?;
    let dark_flat = combine_dir(
        args.dark_flat.as_deref(),
        CalibrationRole::DarkFlat,
        &config,
        bias.as_ref(),
        None,
        &reporter,
    )?;
    let flat = match args.flat.as_deref() {
        Some(dir) => Some(combine_flats(dir, bias.as_ref(), dark_flat.as_ref(), &config, &reporter)?),
        None => None,
    };

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let masters: Vec<&MasterFrame> = [&bias, &dark, &dark_flat, &flat].into_iter().flatten().collect();
    if args.save_masters {
        for master in &masters {
            let name = format!("master_{}.tiff", master.role.to_string().to_lowercase().replace(' ', "_"));
            save_frame(&master.frame, &args.output.join(name))?;
        }
    }
    print_masters(&masters);

    let calibrator = Calibrator::new(CalibrationMasters { bias, dark, flat }, config)?;

    reporter.begin_stage(ProcessingStage::Loading, Some(lights.len()));
    let mut frames = Vec::with_capacity(lights.len());
    for (i, path) in lights.iter().enumerate() {
        frames.push(with_exposure(load_frame(path, i)?, args.exposure));
        reporter.advance(i + 1);
    }
    reporter.finish_stage();

    let results = calibrator.calibrate_batch(&frames, &reporter);
    drop(frames);

    reporter.begin_stage(ProcessingStage::Writing, Some(lights.len()));
    let mut failed = 0usize;
    for (i, (path, result)) in lights.iter().zip(results).enumerate() {
        let written = result
            .with_context(|| format!("Failed to calibrate {}", path.display()))
            .and_then(|frame| save_frame(&frame, &output_path(&args.output, path)));
        if let Err(e) = written {
            warn!(file = %path.display(), "{e:#}");
            failed += 1;
        }
        reporter.advance(i + 1);
    }
    reporter.finish_stage();

    if let Some(flat) = calibrator.normalized_flat() {
        if !flat.clamped_positions.is_empty() {
            write_bad_pixels(&args.output.join(BAD_PIXELS_FILE), &flat.clamped_positions)?;
        }
    }

    print_calibration_result(
        calibrator.normalized_flat(),
        lights.len() - failed,
        lights.len(),
        &args.output,
    );
    if failed > 0 {
        bail!("{failed} frame(s) failed to calibrate");
    }
    Ok(())
}

/// Load a calibration directory and combine it into a master, removing the
/// bias master from each frame first when one is given.
fn combine_dir(
    dir: Option<&Path>,
    role: CalibrationRole,
    config: &CalibrationConfig,
    bias: Option<&MasterFrame>,
    exposure: Option<f64>,
    reporter: &dyn ProgressReporter,
) -> Result<Option<MasterFrame>> {
    let Some(dir) = dir else {
        return Ok(None);
    };
    let mut frames = load_dir(dir)?;
    if let Some(bias) = bias {
        frames = frames
            .into_iter()
            .map(|f| subtract_master(f, bias))
            .collect::<Result<_>>()?;
    }
    let frames: Vec<PixelFrame> = frames.into_iter().map(|f| with_exposure(f, exposure)).collect();

    let master = combine(&frames, role, config, reporter)?;
    Ok(Some(master))
}

/// Flats need bias or dark-flat removal before they are combined.
fn combine_flats(
    dir: &Path,
    bias: Option<&MasterFrame>,
    dark_flat: Option<&MasterFrame>,
    config: &CalibrationConfig,
    reporter: &dyn ProgressReporter,
) -> Result<MasterFrame> {
    if bias.is_none() && dark_flat.is_none() {
        bail!("Flat frames need --bias or --dark-flat for correction");
    }
    let prep = Calibrator::new(
        CalibrationMasters {
            bias: bias.cloned(),
            ..Default::default()
        },
        config.clone(),
    )?;

    let frames = load_dir(dir)?
        .iter()
        .map(|raw| prep.correct_flat_frame(raw, dark_flat))
        .collect::<lightcurve_core::error::Result<Vec<_>>>()
        .context("Failed to prepare flat frames")?;

    combine(&frames, CalibrationRole::Flat, config, reporter)
}

fn combine(
    frames: &[PixelFrame],
    role: CalibrationRole,
    config: &CalibrationConfig,
    reporter: &dyn ProgressReporter,
) -> Result<MasterFrame> {
    reporter.begin_stage(ProcessingStage::CombiningMaster(role), Some(frames.len()));
    let master = build_master_with(frames, role, &config.combine)
        .with_context(|| format!("Failed to build {role} master"))?;
    reporter.advance(master.n_combined);
    reporter.finish_stage();
    info!(role = %role, frames = master.n_combined, "Master ready");
    Ok(master)
}

fn subtract_master(frame: PixelFrame, master: &MasterFrame) -> Result<PixelFrame> {
    frame.ensure_same_shape(&master.frame)?;
    let data = &frame.data - &master.frame.data;
    Ok(frame.derive(data, format!("{} subtracted", master.role)))
}

fn with_exposure(mut frame: PixelFrame, exposure: Option<f64>) -> PixelFrame {
    if exposure.is_some() {
        frame.metadata.exposure_s = exposure;
    }
    frame
}

fn output_path(dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string());
    dir.join(format!("{stem}_cal.tiff"))
}
