//! Sigma-clipped statistics.
//!
//! The one robustness primitive of the crate: sky estimation, centroid
//! thresholds, dark scaling and sigma-clipped master combination all go
//! through [`sigma_clipped_stats`].

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_CLIP_ITERATIONS, DEFAULT_CLIP_SIGMA, MIN_CLIP_SAMPLES};
use crate::error::{PhotometryError, Result};

/// Parameters for iterative sigma clipping.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SigmaClipParams {
    /// Maximum number of rejection iterations (default: 10).
    pub iterations: usize,
    /// Rejection threshold in standard deviations (default: 3.0).
    pub sigma: f64,
}

impl Default for SigmaClipParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_CLIP_ITERATIONS,
            sigma: DEFAULT_CLIP_SIGMA,
        }
    }
}

/// Result of [`sigma_clipped_stats`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClippedStats {
    pub median: f64,
    pub mean: f64,
    /// Population standard deviation of the surviving samples.
    pub stddev: f64,
    pub n_used: usize,
    /// Samples excluded by clipping or for being non-finite.
    pub n_rejected: usize,
    /// Too few samples to clip; the statistics are unclipped.
    pub degenerate: bool,
}

/// Iteratively reject samples further than `sigma * stddev` from the
/// median, re-estimating both after every pass.
///
/// Stops when a pass rejects nothing or after `params.iterations` passes.
/// Non-finite samples are dropped up front. With fewer than
/// [`MIN_CLIP_SAMPLES`] finite samples nothing is clipped and the result is
/// flagged `degenerate`.
pub fn sigma_clipped_stats<T>(samples: &[T], params: &SigmaClipParams) -> Result<ClippedStats>
where
    T: Copy + Into<f64>,
{
    let mut values: Vec<f64> = samples
        .iter()
        .map(|&v| v.into())
        .filter(|v| v.is_finite())
        .collect();
    let non_finite = samples.len() - values.len();

    if values.is_empty() {
        return Err(PhotometryError::EmptySample);
    }

    if values.len() < MIN_CLIP_SAMPLES {
        let (mean, stddev) = mean_stddev(&values);
        let n_used = values.len();
        return Ok(ClippedStats {
            median: median_of(&mut values),
            mean,
            stddev,
            n_used,
            n_rejected: non_finite,
            degenerate: true,
        });
    }

    let mut scratch = values.clone();
    for _ in 0..params.iterations {
        scratch.clear();
        scratch.extend_from_slice(&values);
        let center = median_of(&mut scratch);
        let (_, stddev) = mean_stddev(&values);
        if stddev <= 0.0 {
            break;
        }
        let limit = params.sigma * stddev;
        let before = values.len();
        values.retain(|v| (v - center).abs() <= limit);
        if values.len() == before || values.is_empty() {
            break;
        }
    }

    // Pathological sigma values can clip everything; fall back to the input.
    if values.is_empty() {
        values = samples
            .iter()
            .map(|&v| v.into())
            .filter(|v: &f64| v.is_finite())
            .collect();
    }

    let (mean, stddev) = mean_stddev(&values);
    let n_used = values.len();
    Ok(ClippedStats {
        median: median_of(&mut values),
        mean,
        stddev,
        n_used,
        n_rejected: samples.len() - n_used,
        degenerate: false,
    })
}

/// Median using `select_nth_unstable` (O(n), reorders the slice).
///
/// Returns NaN for an empty slice.
pub fn median_of(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return values[0];
    }
    let mid = n / 2;
    if n % 2 == 1 {
        *values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b)).1
    } else {
        values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        let upper = values[mid];
        values[..mid].select_nth_unstable_by(mid - 1, |a, b| a.total_cmp(b));
        (values[mid - 1] + upper) / 2.0
    }
}

/// Mean and population standard deviation.
pub fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}
