//! Magnitudes and time stamps derived from flux measurements.

use crate::consts::{EPSILON, MICROS_PER_DAY, UNIX_EPOCH_JD};
use crate::error::{PhotometryError, Result};

/// `-2.5 log10(flux)`; `None` for non-positive or non-finite flux.
pub fn instrumental_magnitude(flux: f64) -> Option<f64> {
    (flux.is_finite() && flux > 0.0).then(|| -2.5 * flux.log10())
}

/// One-sigma magnitude uncertainty for a given signal-to-noise ratio.
pub fn magnitude_error(snr: f64) -> Option<f64> {
    (snr.is_finite() && snr > 0.0).then(|| 2.5 / std::f64::consts::LN_10 / snr)
}

/// Calibrated magnitude of a target from a comparison star of known
/// magnitude measured on the same frame.
pub fn differential_magnitude(
    target_flux: f64,
    reference_flux: f64,
    reference_magnitude: f64,
) -> Option<f64> {
    let target = instrumental_magnitude(target_flux)?;
    let reference = instrumental_magnitude(reference_flux)?;
    Some(target - reference + reference_magnitude)
}

/// Weighted combination of the three color fluxes. Weights are normalized
/// to sum to one.
pub fn weighted_channel_flux(red: f64, green: f64, blue: f64, weights: [f64; 3]) -> Result<f64> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(PhotometryError::InvalidParameter(format!(
            "channel weights must be finite and non-negative, got {weights:?}"
        )));
    }
    let total: f64 = weights.iter().sum();
    if total < EPSILON {
        return Err(PhotometryError::InvalidParameter(
            "channel weights are all zero".into(),
        ));
    }
    let [wr, wg, wb] = weights;
    Ok((red * wr + green * wg + blue * wb) / total)
}

/// Julian date for a capture time given in microseconds since the Unix epoch.
pub fn julian_date(timestamp_us: u64) -> f64 {
    UNIX_EPOCH_JD + timestamp_us as f64 / MICROS_PER_DAY
}
