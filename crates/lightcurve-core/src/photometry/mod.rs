pub mod aperture;
pub mod magnitude;
pub mod measure;

pub use aperture::{ApertureGeometry, ApertureRadii, ApertureSpec};
pub use magnitude::{
    differential_magnitude, instrumental_magnitude, julian_date, magnitude_error,
    weighted_channel_flux,
};
pub use measure::{measure, FluxMeasurement, PhotometryMeasurer, SkyStatistics};
