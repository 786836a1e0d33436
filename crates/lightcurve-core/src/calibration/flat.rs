use ndarray::{Array3, Axis, Zip};
use tracing::{info, warn};

use crate::error::{PhotometryError, Result};

use super::master::MasterFrame;

/// Flat master scaled to unit mean, ready to divide into light frames.
///
/// Color flats share one normalization reference: the smallest of the
/// per-channel means. Each channel therefore keeps its sensitivity relative
/// to the others instead of being flattened to 1.0 on its own.
#[derive(Clone, Debug)]
pub struct NormalizedFlat {
    pub data: Array3<f32>,
    /// Mean the flat was divided by.
    pub reference_mean: f64,
    /// Pixels raised to the floor value to avoid dividing by ~0.
    pub clamped_pixels: usize,
    /// `(row, col)` of every clamped pixel, in any channel.
    pub clamped_positions: Vec<(usize, usize)>,
}

impl NormalizedFlat {
    /// `(flat - bias - dark) / reference_mean(flat - bias - dark)`.
    ///
    /// When the flat master was combined from already corrected frames, the
    /// bias and dark terms have been applied and are not subtracted again.
    pub fn new(
        flat: &MasterFrame,
        bias: Option<&MasterFrame>,
        dark: Option<&MasterFrame>,
        min_value: f64,
    ) -> Result<Self> {
        let mut data = flat.frame.data.clone();
        if !flat.bias_dark_removed() {
            for master in [bias, dark].into_iter().flatten() {
                flat.frame.ensure_same_shape(&master.frame)?;
                data -= &master.frame.data;
            }
        }

        let means: Vec<f64> = data
            .axis_iter(Axis(0))
            .map(|plane| plane.iter().map(|&v| v as f64).sum::<f64>() / plane.len() as f64)
            .collect();
        let reference_mean = means.iter().cloned().fold(f64::INFINITY, f64::min);
        if !reference_mean.is_finite() || reference_mean <= 0.0 {
            return Err(PhotometryError::InvalidFrame(format!(
                "flat has non-positive mean {reference_mean} after correction"
            )));
        }

        let scale = (1.0 / reference_mean) as f32;
        let floor = min_value as f32;
        let mut clamped_pixels = 0usize;
        let mut clamped_positions = Vec::new();
        for ((_, row, col), v) in data.indexed_iter_mut() {
            let normalized = *v * scale;
            if normalized < floor || !normalized.is_finite() {
                clamped_pixels += 1;
                clamped_positions.push((row, col));
                *v = floor;
            } else {
                *v = normalized;
            }
        }
        clamped_positions.sort_unstable();
        clamped_positions.dedup();

        if clamped_pixels > 0 {
            warn!(
                clamped = clamped_pixels,
                floor = min_value,
                "Normalized flat has near-zero pixels; clamped"
            );
        }
        info!(channel_means = ?means, reference_mean, "Flat normalized");

        Ok(Self {
            data,
            reference_mean,
            clamped_pixels,
            clamped_positions,
        })
    }

    /// Divide `data` by the normalized flat in place.
    pub(crate) fn divide_into(&self, data: &mut Array3<f32>) -> Result<()> {
        if data.dim() != self.data.dim() {
            return Err(PhotometryError::ShapeMismatch {
                expected: self.data.dim(),
                actual: data.dim(),
            });
        }
        Zip::from(data).and(&self.data).for_each(|v, &f| *v /= f);
        Ok(())
    }
}
