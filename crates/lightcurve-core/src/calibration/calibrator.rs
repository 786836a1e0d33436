use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array3, Axis};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{CalibrationConfig, DarkScaling};
use crate::consts::{
    DARK_OPTIMIZE_ITERATIONS, DARK_OPTIMIZE_PIXEL_FRACTION, DARK_OPTIMIZE_SIGMA,
    DARK_SCALE_RANGE, PARALLEL_FRAME_THRESHOLD,
};
use crate::error::{PhotometryError, Result};
use crate::frame::PixelFrame;
use crate::progress::{ProcessingStage, ProgressReporter};
use crate::stats::{median_of, sigma_clipped_stats, SigmaClipParams};

use super::flat::NormalizedFlat;
use super::master::{CalibrationRole, MasterFrame};

/// The master frames available to a calibration run. Any subset may be present.
#[derive(Clone, Debug, Default)]
pub struct CalibrationMasters {
    pub bias: Option<MasterFrame>,
    /// Dark current master (bias already removed), matched to the lights.
    pub dark: Option<MasterFrame>,
    pub flat: Option<MasterFrame>,
}

/// Applies bias, dark and flat correction to light frames.
///
/// The normalized flat is computed once, when the calibrator is built.
#[derive(Clone, Debug)]
pub struct Calibrator {
    bias: Option<MasterFrame>,
    dark: Option<MasterFrame>,
    flat: Option<NormalizedFlat>,
    config: CalibrationConfig,
}

impl Calibrator {
    pub fn new(masters: CalibrationMasters, config: CalibrationConfig) -> Result<Self> {
        let present: Vec<&MasterFrame> = [&masters.bias, &masters.dark, &masters.flat]
            .into_iter()
            .flatten()
            .collect();
        if let Some((first, rest)) = present.split_first() {
            for master in rest {
                first.frame.ensure_same_shape(&master.frame)?;
            }
        }

        let flat = masters
            .flat
            .as_ref()
            .map(|flat| {
                NormalizedFlat::new(
                    flat,
                    masters.bias.as_ref(),
                    masters.dark.as_ref(),
                    config.min_flat_value,
                )
            })
            .transpose()?;

        info!(
            bias = masters.bias.is_some(),
            dark = masters.dark.is_some(),
            flat = flat.is_some(),
            dark_scaling = %config.dark_scaling,
            "Calibrator initialized"
        );

        Ok(Self {
            bias: masters.bias,
            dark: masters.dark,
            flat,
            config,
        })
    }

    pub fn normalized_flat(&self) -> Option<&NormalizedFlat> {
        self.flat.as_ref()
    }

    /// `(light - bias - dark * scale) / normalized_flat`, per channel.
    pub fn calibrate_frame(&self, light: &PixelFrame) -> Result<PixelFrame> {
        let mut data = light.data.clone();
        let mut steps = Vec::new();

        if let Some(ref bias) = self.bias {
            light.ensure_same_shape(&bias.frame)?;
            data -= &bias.frame.data;
            steps.push("Bias subtracted".to_string());
        }

        if let Some(ref dark) = self.dark {
            light.ensure_same_shape(&dark.frame)?;
            let scales = self.dark_scales(light, dark)?;
            for (ch, &scale) in scales.iter().enumerate() {
                data.index_axis_mut(Axis(0), ch)
                    .scaled_add(-(scale as f32), &dark.frame.data.index_axis(Axis(0), ch));
            }
            steps.push(format!("Dark subtracted (scale {})", format_scales(&scales)));
        }

        if self.config.clamp_negative {
            data.mapv_inplace(|v| v.max(0.0));
        }

        if let Some(ref flat) = self.flat {
            flat.divide_into(&mut data)?;
            steps.push(format!(
                "Flat fielded (reference mean {:.3})",
                flat.reference_mean
            ));
            if flat.clamped_pixels > 0 {
                steps.push(format!(
                    "{} flat pixels clamped to {}",
                    flat.clamped_pixels, self.config.min_flat_value
                ));
            }
        }

        debug!(frame = light.metadata.frame_index, steps = steps.len(), "Frame calibrated");

        let summary = if steps.is_empty() {
            "Calibrated: no masters applied".to_string()
        } else {
            format!("Calibrated: {}", steps.join("; "))
        };
        let mut out = light.derive(data, summary);
        if let Some(ref flat) = self.flat {
            if !flat.clamped_positions.is_empty() {
                let bad = &mut out.metadata.bad_pixels;
                bad.extend_from_slice(&flat.clamped_positions);
                bad.sort_unstable();
                bad.dedup();
            }
        }
        let provenance = &mut out.metadata.provenance;
        provenance.bias_dark_removed |= self.bias.is_some() || self.dark.is_some();
        provenance.flat_fielded |= self.flat.is_some();
        Ok(out)
    }

    /// Calibrate independent frames, in parallel for larger batches.
    /// Results are returned in input order.
    pub fn calibrate_batch(
        &self,
        lights: &[PixelFrame],
        reporter: &dyn ProgressReporter,
    ) -> Vec<Result<PixelFrame>> {
        reporter.begin_stage(ProcessingStage::Calibrating, Some(lights.len()));
        let done = AtomicUsize::new(0);
        let calibrate_one = |frame: &PixelFrame| {
            let result = self.calibrate_frame(frame);
            reporter.advance(done.fetch_add(1, Ordering::Relaxed) + 1);
            result
        };
        let results = if lights.len() >= PARALLEL_FRAME_THRESHOLD {
            lights.par_iter().map(calibrate_one).collect()
        } else {
            lights.iter().map(calibrate_one).collect()
        };
        reporter.finish_stage();
        results
    }

    /// Remove bias and dark-flat signal from a raw flat so it can be
    /// combined into a flat master.
    pub fn correct_flat_frame(
        &self,
        raw_flat: &PixelFrame,
        dark_flat: Option<&MasterFrame>,
    ) -> Result<PixelFrame> {
        if self.bias.is_none() && dark_flat.is_none() {
            return Err(PhotometryError::InvalidParameter(
                "flat correction needs a bias or dark-flat master".into(),
            ));
        }
        if let Some(master) = dark_flat {
            if master.role != CalibrationRole::DarkFlat && master.role != CalibrationRole::Dark {
                return Err(PhotometryError::InvalidParameter(format!(
                    "expected a dark-flat master, got {}",
                    master.role
                )));
            }
        }

        let mut data = raw_flat.data.clone();
        let mut applied = Vec::new();
        for (label, master) in [("bias", self.bias.as_ref()), ("dark flat", dark_flat)] {
            if let Some(master) = master {
                raw_flat.ensure_same_shape(&master.frame)?;
                data -= &master.frame.data;
                applied.push(label);
            }
        }
        if self.config.clamp_negative {
            data.mapv_inplace(|v| v.max(0.0));
        }

        let mut out = raw_flat.derive(data, format!("Flat prepared ({} removed)", applied.join(", ")));
        out.metadata.provenance.bias_dark_removed = true;
        Ok(out)
    }

    /// Dark scale factor per channel for this light frame.
    pub fn dark_scales(&self, light: &PixelFrame, dark: &MasterFrame) -> Result<Vec<f64>> {
        let channels = light.channel_count();
        match self.config.dark_scaling {
            DarkScaling::Fixed(scale) => Ok(vec![scale; channels]),
            DarkScaling::FromExposure => {
                let scale = match (light.metadata.exposure_s, dark.frame.metadata.exposure_s) {
                    (Some(l), Some(d)) if d > 0.0 => l / d,
                    _ => {
                        warn!(
                            frame = light.metadata.frame_index,
                            "Exposure time missing on light or dark; using dark scale 1.0"
                        );
                        1.0
                    }
                };
                Ok(vec![scale; channels])
            }
            DarkScaling::Optimized => {
                let bias_removed = match self.bias {
                    Some(ref bias) => &light.data - &bias.frame.data,
                    None => light.data.clone(),
                };
                Ok((0..channels)
                    .map(|ch| optimize_dark_scale(&bias_removed, &dark.frame.data, ch))
                    .collect())
            }
        }
    }
}

/// Robust ratio of light to dark signal over pixels with significant dark
/// current, clamped to [`DARK_SCALE_RANGE`].
fn optimize_dark_scale(light: &Array3<f32>, dark: &Array3<f32>, ch: usize) -> f64 {
    let light = light.index_axis(Axis(0), ch);
    let dark = dark.index_axis(Axis(0), ch);

    let mut dark_values: Vec<f64> = dark.iter().map(|&v| v as f64).collect();
    let dark_median = median_of(&mut dark_values);
    if dark_median.is_nan() || dark_median <= 0.0 {
        return 1.0;
    }

    let cutoff = dark_median * DARK_OPTIMIZE_PIXEL_FRACTION;
    let ratios: Vec<f64> = light
        .iter()
        .zip(dark.iter())
        .filter(|&(&l, &d)| d as f64 > cutoff && l > 0.0)
        .map(|(&l, &d)| l as f64 / d as f64)
        .collect();

    let params = SigmaClipParams {
        iterations: DARK_OPTIMIZE_ITERATIONS,
        sigma: DARK_OPTIMIZE_SIGMA,
    };
    let factor = match sigma_clipped_stats(&ratios, &params) {
        Ok(stats) => stats.median,
        Err(_) => {
            let mut light_values: Vec<f64> = light.iter().map(|&v| v as f64).collect();
            median_of(&mut light_values) / dark_median
        }
    };
    let factor = if factor.is_finite() { factor } else { 1.0 };
    let (lo, hi) = DARK_SCALE_RANGE;
    let clamped = factor.clamp(lo, hi);
    debug!(channel = ch, factor = clamped, "Optimized dark scale");
    clamped
}

fn format_scales(scales: &[f64]) -> String {
    scales
        .iter()
        .map(|s| format!("{s:.3}"))
        .collect::<Vec<_>>()
        .join("/")
}

/// One-shot calibration with explicit masters and a fixed dark scale.
///
/// Builds the normalized flat on every call; use [`Calibrator`] to reuse it
/// across a sequence.
pub fn calibrate(
    light: &PixelFrame,
    bias: &MasterFrame,
    dark: &MasterFrame,
    flat: &MasterFrame,
    exposure_scale: f64,
) -> Result<PixelFrame> {
    let calibrator = Calibrator::new(
        CalibrationMasters {
            bias: Some(bias.clone()),
            dark: Some(dark.clone()),
            flat: Some(flat.clone()),
        },
        CalibrationConfig {
            dark_scaling: DarkScaling::Fixed(exposure_scale),
            ..Default::default()
        },
    )?;
    calibrator.calibrate_frame(light)
}
