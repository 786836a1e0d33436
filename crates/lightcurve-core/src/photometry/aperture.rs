//! Circular source aperture and sky annulus.
//!
//! A pixel belongs to a region when its center falls inside it (the
//! "center" method): no partial-pixel weighting. Pixels outside the frame
//! are skipped, so areas are in-frame pixel counts.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_INNER_SKY_RADIUS, DEFAULT_OUTER_SKY_RADIUS, DEFAULT_SOURCE_RADIUS};
use crate::error::{PhotometryError, Result};
use crate::frame::PixelPos;

/// The three aperture radii, without a center. Used in configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApertureRadii {
    pub source: f64,
    pub inner_sky: f64,
    pub outer_sky: f64,
}

impl Default for ApertureRadii {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE_RADIUS,
            inner_sky: DEFAULT_INNER_SKY_RADIUS,
            outer_sky: DEFAULT_OUTER_SKY_RADIUS,
        }
    }
}

impl ApertureRadii {
    /// Require `0 < source < inner_sky < outer_sky`, all finite.
    pub fn validate(&self) -> Result<()> {
        let radii = [self.source, self.inner_sky, self.outer_sky];
        if radii.iter().any(|r| !r.is_finite()) {
            return Err(PhotometryError::InvalidAperture(format!(
                "radii must be finite, got {radii:?}"
            )));
        }
        if !(0.0 < self.source && self.source < self.inner_sky && self.inner_sky < self.outer_sky) {
            return Err(PhotometryError::InvalidAperture(format!(
                "require 0 < source ({}) < inner sky ({}) < outer sky ({})",
                self.source, self.inner_sky, self.outer_sky
            )));
        }
        Ok(())
    }

    pub fn at(&self, center: PixelPos) -> Result<ApertureSpec> {
        ApertureSpec::new(center, self.source, self.inner_sky, self.outer_sky)
    }
}

/// A source aperture plus sky annulus at a position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApertureSpec {
    pub center: PixelPos,
    pub source_radius: f64,
    pub inner_sky_radius: f64,
    pub outer_sky_radius: f64,
}

impl ApertureSpec {
    pub fn new(
        center: PixelPos,
        source_radius: f64,
        inner_sky_radius: f64,
        outer_sky_radius: f64,
    ) -> Result<Self> {
        let spec = Self {
            center,
            source_radius,
            inner_sky_radius,
            outer_sky_radius,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn radii(&self) -> ApertureRadii {
        ApertureRadii {
            source: self.source_radius,
            inner_sky: self.inner_sky_radius,
            outer_sky: self.outer_sky_radius,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.center.is_finite() {
            return Err(PhotometryError::InvalidAperture(format!(
                "center {} is not finite",
                self.center
            )));
        }
        self.radii().validate()
    }
}

/// In-frame pixel coordinates `(row, col)` of the aperture and annulus.
#[derive(Clone, Debug)]
pub struct ApertureGeometry {
    pub spec: ApertureSpec,
    pub source: Vec<(usize, usize)>,
    pub annulus: Vec<(usize, usize)>,
    frame_dim: (usize, usize),
}

impl ApertureGeometry {
    /// Enumerate the pixels of `spec` on a `height x width` grid.
    pub fn new(spec: &ApertureSpec, height: usize, width: usize) -> Result<Self> {
        spec.validate()?;

        let ApertureSpec {
            center,
            source_radius,
            inner_sky_radius,
            outer_sky_radius,
        } = *spec;

        let mut source = Vec::new();
        let mut annulus = Vec::new();

        if let (Some((col_min, col_max)), Some((row_min, row_max))) = (
            clipped_span(center.x, outer_sky_radius, width),
            clipped_span(center.y, outer_sky_radius, height),
        ) {
            let r_src_sq = source_radius * source_radius;
            let r_in_sq = inner_sky_radius * inner_sky_radius;
            let r_out_sq = outer_sky_radius * outer_sky_radius;

            for row in row_min..=row_max {
                let dy = row as f64 - center.y;
                for col in col_min..=col_max {
                    let dx = col as f64 - center.x;
                    let dist_sq = dx * dx + dy * dy;
                    if dist_sq <= r_src_sq {
                        source.push((row, col));
                    } else if dist_sq >= r_in_sq && dist_sq <= r_out_sq {
                        annulus.push((row, col));
                    }
                }
            }
        }

        Ok(Self {
            spec: *spec,
            source,
            annulus,
            frame_dim: (height, width),
        })
    }

    /// In-frame pixels of the source aperture.
    pub fn aperture_area(&self) -> usize {
        self.source.len()
    }

    /// In-frame pixels of the sky annulus.
    pub fn sky_annulus_area(&self) -> usize {
        self.annulus.len()
    }

    /// Geometric area `pi * r^2` of the source aperture.
    pub fn nominal_aperture_area(&self) -> f64 {
        std::f64::consts::PI * self.spec.source_radius * self.spec.source_radius
    }

    /// True when part of the source aperture lies outside the frame.
    pub fn is_truncated(&self) -> bool {
        let (h, w) = self.frame_dim;
        let c = self.spec.center;
        let r = self.spec.source_radius;
        c.x - r < 0.0
            || c.y - r < 0.0
            || c.x + r > w.saturating_sub(1) as f64
            || c.y + r > h.saturating_sub(1) as f64
    }

    /// Sum of the plane over the source aperture.
    pub fn source_sum(&self, plane: &ArrayView2<f32>) -> f64 {
        self.source
            .iter()
            .map(|&(row, col)| plane[[row, col]] as f64)
            .sum()
    }

    /// Source aperture pixels listed in `bad`, which must be sorted.
    pub fn flagged_source_pixels(&self, bad: &[(usize, usize)]) -> usize {
        if bad.is_empty() {
            return 0;
        }
        self.source
            .iter()
            .filter(|px| bad.binary_search(px).is_ok())
            .count()
    }

    /// Plane values inside the annulus.
    pub fn annulus_values(&self, plane: &ArrayView2<f32>) -> Vec<f64> {
        self.annulus
            .iter()
            .map(|&(row, col)| plane[[row, col]] as f64)
            .collect()
    }
}

/// Inclusive index range `[center - radius, center + radius]` clipped to
/// `[0, len - 1]`, or `None` when it misses the axis entirely.
fn clipped_span(center: f64, radius: f64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let lo = (center - radius).ceil().max(0.0);
    let hi = (center + radius).floor().min((len - 1) as f64);
    if lo > hi {
        return None;
    }
    Some((lo as usize, hi as usize))
}
