use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use lightcurve_core::config::{CalibrationConfig, SessionConfig};
use serde::{Deserialize, Serialize};

/// Everything the `calibrate` and `photometry` commands read from a config
/// file. Missing sections fall back to their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightcurveConfig {
    pub calibration: CalibrationConfig,
    pub session: SessionConfig,
}

impl LightcurveConfig {
    /// Load a TOML config file, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&contents).context("Invalid lightcurve config")
    }
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Write config to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Print or save the default configuration as TOML.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let config = LightcurveConfig::default();
    let toml_str = toml::to_string_pretty(&config)?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        println!("Default config saved to {}", path.display());
    } else {
        print!("{}", toml_str);
    }

    Ok(())
}
