mod commands;
mod io;
mod progress;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lightcurve", about = "Calibration and aperture photometry for CCD/DSLR frames")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build master frames and calibrate a directory of lights
    Calibrate(commands::calibrate::CalibrateArgs),
    /// Track a star through a frame sequence and measure its light curve
    Photometry(commands::photometry::PhotometryArgs),
    /// Differential magnitudes of a target against a reference star
    Analyze(commands::analyze::AnalyzeArgs),
    /// Print or save the default configuration as TOML
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Calibrate(args) => commands::calibrate::run(args),
        Commands::Photometry(args) => commands::photometry::run(args),
        Commands::Analyze(args) => commands::analyze::run(args),
        Commands::Config(args) => commands::config::run(args),
    }
}
