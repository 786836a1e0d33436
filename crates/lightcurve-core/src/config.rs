use serde::{Deserialize, Serialize};

use crate::calibration::CombineMethod;
use crate::consts::{
    DEFAULT_EDGE_MARGIN, DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_MAX_MOVEMENT,
    DEFAULT_MIN_FLAT_VALUE, DEFAULT_SEARCH_RADIUS, DEFAULT_VALIDATION_SIGMA,
};
use crate::error::{PhotometryError, Result};
use crate::photometry::ApertureRadii;
use crate::stats::SigmaClipParams;

/// How the dark master is scaled before it is subtracted from a light.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum DarkScaling {
    /// Multiply the dark by a constant.
    Fixed(f64),
    /// Light exposure over dark exposure, from frame metadata.
    FromExposure,
    /// Robust per-channel light/dark ratio, clamped to a sane range.
    Optimized,
}

impl Default for DarkScaling {
    fn default() -> Self {
        Self::Fixed(1.0)
    }
}

impl std::fmt::Display for DarkScaling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(s) => write!(f, "fixed x{s}"),
            Self::FromExposure => write!(f, "exposure ratio"),
            Self::Optimized => write!(f, "optimized"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub dark_scaling: DarkScaling,
    /// Floor applied to the normalized flat.
    pub min_flat_value: f64,
    /// Clamp negative pixels to zero after bias/dark subtraction.
    pub clamp_negative: bool,
    /// Method used when combining masters.
    pub combine: CombineMethod,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            dark_scaling: DarkScaling::default(),
            min_flat_value: DEFAULT_MIN_FLAT_VALUE,
            clamp_negative: false,
            combine: CombineMethod::default(),
        }
    }
}

/// Pixel weighting inside the centroid window, applied to the signal above
/// threshold.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum CentroidWeighting {
    Linear,
    Power(f64),
}

impl Default for CentroidWeighting {
    fn default() -> Self {
        Self::Linear
    }
}

impl CentroidWeighting {
    pub fn exponent(&self) -> f64 {
        match self {
            Self::Linear => 1.0,
            Self::Power(p) => *p,
        }
    }
}

impl std::fmt::Display for CentroidWeighting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linear => write!(f, "Linear"),
            Self::Power(p) => write!(f, "Power({p})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Half-size of the square centroid window, pixels.
    pub search_radius: f64,
    /// Largest accepted jump from the last valid center, pixels.
    pub max_movement: f64,
    /// Failures tolerated before the track is declared lost.
    pub max_consecutive_failures: u32,
    /// Required brightness of the refined center above the window background,
    /// in background sigmas.
    pub validation_sigma: f64,
    /// Minimum distance of an accepted center from the frame border, pixels.
    pub edge_margin: f64,
    /// Fixed centroid threshold in sigmas; adaptive when `None`.
    pub threshold_sigma: Option<f64>,
    pub weighting: CentroidWeighting,
    /// Center the search window on a position extrapolated from recent motion.
    pub motion_prediction: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            search_radius: DEFAULT_SEARCH_RADIUS,
            max_movement: DEFAULT_MAX_MOVEMENT,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            validation_sigma: DEFAULT_VALIDATION_SIGMA,
            edge_margin: DEFAULT_EDGE_MARGIN,
            threshold_sigma: None,
            weighting: CentroidWeighting::default(),
            motion_prediction: false,
        }
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("search_radius", self.search_radius),
            ("max_movement", self.max_movement),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(PhotometryError::InvalidParameter(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if !self.validation_sigma.is_finite() || !self.edge_margin.is_finite() || self.edge_margin < 0.0 {
            return Err(PhotometryError::InvalidParameter(format!(
                "invalid validation_sigma {} or edge_margin {}",
                self.validation_sigma, self.edge_margin
            )));
        }
        if let Some(k) = self.threshold_sigma {
            if !k.is_finite() {
                return Err(PhotometryError::InvalidParameter(format!(
                    "threshold_sigma must be finite, got {k}"
                )));
            }
        }
        let p = self.weighting.exponent();
        if !p.is_finite() || p <= 0.0 {
            return Err(PhotometryError::InvalidParameter(format!(
                "centroid weighting exponent must be positive, got {p}"
            )));
        }
        Ok(())
    }
}

/// Everything a photometry session needs besides frames and a seed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub aperture: ApertureRadii,
    pub tracking: TrackingConfig,
    pub sky_clip: SigmaClipParams,
}

impl SessionConfig {
    /// Check all parameters before any frame is touched.
    pub fn validate(&self) -> Result<()> {
        self.aperture.validate()?;
        self.tracking.validate()?;
        if self.sky_clip.iterations == 0 || !self.sky_clip.sigma.is_finite() || self.sky_clip.sigma <= 0.0 {
            return Err(PhotometryError::InvalidParameter(format!(
                "sky clip needs at least one iteration and a positive sigma, got {:?}",
                self.sky_clip
            )));
        }
        Ok(())
    }
}
