//! Master-frame construction and bias/dark/flat correction.

pub mod calibrator;
pub mod flat;
pub mod master;

pub use calibrator::{calibrate, CalibrationMasters, Calibrator};
pub use flat::NormalizedFlat;
pub use master::{build_master, build_master_with, CalibrationRole, CombineMethod, MasterFrame};
