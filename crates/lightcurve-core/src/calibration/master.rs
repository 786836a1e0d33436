use ndarray::{Array3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{PhotometryError, Result};
use crate::frame::{FrameMetadata, PixelFrame, Provenance};
use crate::stats::{median_of, sigma_clipped_stats, SigmaClipParams};

/// Calibration role of a master frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalibrationRole {
    Bias,
    Dark,
    Flat,
    /// Dark taken with the flat exposure, subtracted from raw flats.
    DarkFlat,
}

impl std::fmt::Display for CalibrationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bias => write!(f, "Bias"),
            Self::Dark => write!(f, "Dark"),
            Self::Flat => write!(f, "Flat"),
            Self::DarkFlat => write!(f, "Dark Flat"),
        }
    }
}

/// How a stack of calibration frames is reduced to one value per pixel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum CombineMethod {
    #[default]
    Median,
    SigmaClippedMean(SigmaClipParams),
}

impl std::fmt::Display for CombineMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Median => write!(f, "Median"),
            Self::SigmaClippedMean(_) => write!(f, "Sigma-Clipped Mean"),
        }
    }
}

/// A combined calibration frame. Read-only once built.
#[derive(Clone, Debug)]
pub struct MasterFrame {
    pub role: CalibrationRole,
    pub frame: PixelFrame,
    /// Number of input frames combined (0 when supplied externally).
    pub n_combined: usize,
}

impl MasterFrame {
    /// Wrap a master that was produced elsewhere (e.g. loaded from disk).
    /// Provenance is taken from the frame's metadata.
    pub fn from_frame(frame: PixelFrame, role: CalibrationRole) -> Self {
        Self {
            role,
            frame,
            n_combined: 0,
        }
    }

    /// True when bias and dark have already been removed from this master.
    pub fn bias_dark_removed(&self) -> bool {
        self.frame.metadata.provenance.bias_dark_removed
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.frame.shape()
    }

    /// Per-channel arithmetic mean.
    pub fn channel_means(&self) -> Vec<f64> {
        self.frame
            .data
            .axis_iter(Axis(0))
            .map(|plane| plane.iter().map(|&v| v as f64).sum::<f64>() / plane.len() as f64)
            .collect()
    }
}

/// Combine frames of one role into a master by per-pixel median.
pub fn build_master(frames: &[PixelFrame], role: CalibrationRole) -> Result<MasterFrame> {
    build_master_with(frames, role, &CombineMethod::Median)
}

/// Combine frames of one role into a master with the given method.
///
/// All frames must share channel count and dimensions. Flat frames must
/// have been bias/dark corrected first (see
/// [`Calibrator::correct_flat_frame`](super::Calibrator::correct_flat_frame)).
pub fn build_master_with(
    frames: &[PixelFrame],
    role: CalibrationRole,
    method: &CombineMethod,
) -> Result<MasterFrame> {
    let first = frames.first().ok_or(PhotometryError::EmptySequence)?;
    for frame in &frames[1..] {
        first.ensure_same_shape(frame)?;
    }
    if role == CalibrationRole::Flat {
        if let Some(index) = frames
            .iter()
            .position(|f| !f.metadata.provenance.bias_dark_removed)
        {
            return Err(PhotometryError::UncalibratedFlat { index });
        }
    }

    let (c, h, w) = first.shape();
    let n = frames.len();
    debug!(role = %role, frames = n, width = w, height = h, "Combining master frame");

    let data = if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        combine_parallel(frames, method, c, h, w)
    } else {
        combine_sequential(frames, method, c, h, w)
    };

    let metadata = FrameMetadata {
        exposure_s: mean_exposure(frames),
        filter: first.metadata.filter.clone(),
        instrument: first.metadata.instrument.clone(),
        telescope: first.metadata.telescope.clone(),
        history: vec![format!("Master {role} combined from {n} frames ({method})")],
        provenance: Provenance {
            bias_dark_removed: frames.iter().all(|f| f.metadata.provenance.bias_dark_removed),
            flat_fielded: false,
        },
        ..Default::default()
    };

    info!(role = %role, frames = n, method = %method, "Master frame built");
    Ok(MasterFrame {
        role,
        frame: PixelFrame { data, metadata },
        n_combined: n,
    })
}

/// Row-parallel: each (channel, row) pair allocates its own scratch buffer.
fn combine_parallel(
    frames: &[PixelFrame],
    method: &CombineMethod,
    c: usize,
    h: usize,
    w: usize,
) -> Array3<f32> {
    let rows: Vec<Vec<f32>> = (0..c * h)
        .into_par_iter()
        .map(|index| {
            let (ch, row) = (index / h, index % h);
            let mut pixel_values = vec![0.0f64; frames.len()];
            (0..w)
                .map(|col| {
                    for (i, frame) in frames.iter().enumerate() {
                        pixel_values[i] = frame.data[[ch, row, col]] as f64;
                    }
                    combine_pixel(&mut pixel_values, method)
                })
                .collect()
        })
        .collect();

    let mut result = Array3::<f32>::zeros((c, h, w));
    for (index, row_data) in rows.into_iter().enumerate() {
        let (ch, row) = (index / h, index % h);
        for (col, val) in row_data.into_iter().enumerate() {
            result[[ch, row, col]] = val;
        }
    }
    result
}

fn combine_sequential(
    frames: &[PixelFrame],
    method: &CombineMethod,
    c: usize,
    h: usize,
    w: usize,
) -> Array3<f32> {
    let mut result = Array3::<f32>::zeros((c, h, w));
    let mut pixel_values = vec![0.0f64; frames.len()];
    for ch in 0..c {
        for row in 0..h {
            for col in 0..w {
                for (i, frame) in frames.iter().enumerate() {
                    pixel_values[i] = frame.data[[ch, row, col]] as f64;
                }
                result[[ch, row, col]] = combine_pixel(&mut pixel_values, method);
            }
        }
    }
    result
}

fn combine_pixel(pixel_values: &mut [f64], method: &CombineMethod) -> f32 {
    match method {
        CombineMethod::Median => median_of(pixel_values) as f32,
        CombineMethod::SigmaClippedMean(params) => match sigma_clipped_stats(&*pixel_values, params) {
            Ok(stats) => stats.mean as f32,
            Err(_) => f32::NAN,
        },
    }
}

fn mean_exposure(frames: &[PixelFrame]) -> Option<f64> {
    let exposures: Option<Vec<f64>> = frames.iter().map(|f| f.metadata.exposure_s).collect();
    exposures.map(|e| e.iter().sum::<f64>() / e.len() as f64)
}
