pub mod calibration;
pub mod config;
pub mod consts;
pub mod error;
pub mod frame;
pub mod photometry;
pub mod progress;
pub mod session;
pub mod stats;
pub mod tracking;
