use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::EPSILON;
use crate::error::{PhotometryError, Result};
use crate::frame::{Channel, PixelFrame};
use crate::stats::{sigma_clipped_stats, SigmaClipParams};

use super::aperture::{ApertureGeometry, ApertureSpec};
use super::magnitude::{instrumental_magnitude, magnitude_error};

/// Robust sky level from the annulus of one measurement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkyStatistics {
    /// Sigma-clipped median, per pixel.
    pub median: f64,
    /// Sigma-clipped standard deviation, per pixel.
    pub sigma: f64,
    pub n_pixels_used: usize,
    pub n_pixels_rejected: usize,
    /// Too few annulus pixels to clip.
    pub degenerate: bool,
}

/// Flux and uncertainty of the target in one channel of one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FluxMeasurement {
    pub channel: Channel,
    /// Sum over the source aperture before sky subtraction.
    pub raw_flux: f64,
    /// Sky median times aperture area.
    pub sky_background_total: f64,
    pub corrected_flux: f64,
    /// Shot noise of the raw (pre-subtraction) counts.
    pub poisson_noise: f64,
    pub sky_noise_contribution: f64,
    pub total_noise: f64,
    /// `None` when the total noise is effectively zero.
    pub snr: Option<f64>,
    pub sky: SkyStatistics,
    pub aperture_area: usize,
    pub sky_annulus_area: usize,
    /// Aperture pixels the frame marks as unreliable.
    pub flagged_pixels: usize,
}

impl FluxMeasurement {
    pub fn instrumental_magnitude(&self) -> Option<f64> {
        instrumental_magnitude(self.corrected_flux)
    }

    pub fn magnitude_error(&self) -> Option<f64> {
        self.snr.and_then(magnitude_error)
    }
}

/// Aperture photometry with sigma-clipped sky estimation.
///
/// Holds only configuration: measuring the same frame twice gives
/// identical results.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhotometryMeasurer {
    pub sky_clip: SigmaClipParams,
}

impl PhotometryMeasurer {
    pub fn new(sky_clip: SigmaClipParams) -> Self {
        Self { sky_clip }
    }

    /// Measure every channel of `frame` (R, G, B and gray for color
    /// frames, gray for mono frames).
    pub fn measure(&self, frame: &PixelFrame, aperture: &ApertureSpec) -> Result<Vec<FluxMeasurement>> {
        let geometry = self.geometry_for(frame, aperture)?;
        let flagged = geometry.flagged_source_pixels(&frame.metadata.bad_pixels);
        frame
            .channels()
            .iter()
            .map(|&channel| {
                let data = frame.channel_data(channel)?;
                let mut m = self.measure_plane(&data.view(), &geometry, channel)?;
                m.flagged_pixels = flagged;
                Ok(m)
            })
            .collect()
    }

    /// Measure a single channel of `frame`.
    pub fn measure_channel(
        &self,
        frame: &PixelFrame,
        channel: Channel,
        aperture: &ApertureSpec,
    ) -> Result<FluxMeasurement> {
        let geometry = self.geometry_for(frame, aperture)?;
        let data = frame.channel_data(channel)?;
        let mut m = self.measure_plane(&data.view(), &geometry, channel)?;
        m.flagged_pixels = geometry.flagged_source_pixels(&frame.metadata.bad_pixels);
        Ok(m)
    }

    /// Enumerate the aperture on `frame` and check both regions have pixels.
    pub fn geometry_for(&self, frame: &PixelFrame, aperture: &ApertureSpec) -> Result<ApertureGeometry> {
        let geometry = ApertureGeometry::new(aperture, frame.height(), frame.width())?;
        if geometry.aperture_area() == 0 {
            return Err(PhotometryError::InsufficientPixels {
                region: "source aperture",
            });
        }
        if geometry.sky_annulus_area() == 0 {
            return Err(PhotometryError::InsufficientPixels {
                region: "sky annulus",
            });
        }
        Ok(geometry)
    }

    /// Photometry on one plane with precomputed geometry.
    pub fn measure_plane(
        &self,
        plane: &ArrayView2<f32>,
        geometry: &ApertureGeometry,
        channel: Channel,
    ) -> Result<FluxMeasurement> {
        let sky = self.sky_statistics(plane, geometry)?;
        let aperture_area = geometry.aperture_area();
        let area = aperture_area as f64;

        let raw_flux = geometry.source_sum(plane);
        let sky_background_total = sky.median * area;
        let corrected_flux = raw_flux - sky_background_total;

        let poisson_noise = if raw_flux > 0.0 { raw_flux.sqrt() } else { 0.0 };
        let sky_noise_contribution = sky.sigma * area.sqrt();
        let total_noise = poisson_noise.hypot(sky_noise_contribution);
        let snr = (total_noise > EPSILON).then(|| corrected_flux / total_noise);

        debug!(
            channel = %channel,
            raw = raw_flux,
            sky = sky_background_total,
            corrected = corrected_flux,
            "Aperture photometry"
        );

        Ok(FluxMeasurement {
            channel,
            raw_flux,
            sky_background_total,
            corrected_flux,
            poisson_noise,
            sky_noise_contribution,
            total_noise,
            snr,
            sky,
            aperture_area,
            sky_annulus_area: geometry.sky_annulus_area(),
            flagged_pixels: 0,
        })
    }

    /// Sigma-clipped statistics of the annulus pixels.
    pub fn sky_statistics(
        &self,
        plane: &ArrayView2<f32>,
        geometry: &ApertureGeometry,
    ) -> Result<SkyStatistics> {
        let values = geometry.annulus_values(plane);
        let stats = sigma_clipped_stats(&values, &self.sky_clip).map_err(|_| {
            PhotometryError::InsufficientPixels {
                region: "sky annulus",
            }
        })?;
        Ok(SkyStatistics {
            median: stats.median,
            sigma: stats.stddev,
            n_pixels_used: stats.n_used,
            n_pixels_rejected: stats.n_rejected,
            degenerate: stats.degenerate,
        })
    }
}

/// Measure every channel of `frame` with the default sky clipping
/// (3 sigma, 10 iterations).
pub fn measure(frame: &PixelFrame, aperture: &ApertureSpec) -> Result<Vec<FluxMeasurement>> {
    PhotometryMeasurer::default().measure(frame, aperture)
}
