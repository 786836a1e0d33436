pub mod centroid;
pub mod tracker;

pub use centroid::{adaptive_threshold_sigma, refine_centroid, CentroidEstimate};
pub use tracker::{
    CenterDecision, CenterOutcome, CenterProvider, CentroidTracker, ManualTracker, TrackState,
    TrackStatus,
};
