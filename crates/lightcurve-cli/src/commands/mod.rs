pub mod analyze;
pub mod calibrate;
pub mod config;
pub mod photometry;
