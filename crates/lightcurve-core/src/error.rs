use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhotometryError {
    #[error("Frame shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("Not enough pixels inside the frame for the {region}")]
    InsufficientPixels { region: &'static str },

    #[error("Invalid aperture: {0}")]
    InvalidAperture(String),

    #[error("Track lost after {failures} consecutive rejected frames")]
    TrackLost { failures: u32 },

    #[error("Flat frame {index} has not been bias/dark corrected")]
    UncalibratedFlat { index: usize },

    #[error("No manual position supplied for frame {index}")]
    MissingManualPosition { index: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Empty frame sequence")]
    EmptySequence,

    #[error("No finite samples")]
    EmptySample,
}

pub type Result<T> = std::result::Result<T, PhotometryError>;
