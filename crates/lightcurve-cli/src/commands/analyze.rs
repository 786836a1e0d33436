use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use lightcurve_core::consts::MICROS_PER_DAY;
use lightcurve_core::photometry::{differential_magnitude, weighted_channel_flux};

/// Default reference star magnitude.
const DEFAULT_REFERENCE_MAG: f64 = 9.8;

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Light curve CSV of the target star
    pub target: PathBuf,

    /// Light curve CSV of the comparison star, row-aligned with the target
    pub reference: PathBuf,

    /// Known magnitude of the comparison star
    #[arg(long, default_value_t = DEFAULT_REFERENCE_MAG)]
    pub reference_mag: f64,

    /// Flux columns for red, green and blue
    #[arg(
        long,
        value_delimiter = ',',
        num_args = 3,
        default_values_t = ["r_flux_corrected".to_string(), "g_flux_corrected".to_string(), "b_flux_corrected".to_string()]
    )]
    pub columns: Vec<String>,

    /// Red, green and blue weights of the combined gray flux
    #[arg(long, value_delimiter = ',', num_args = 3, default_values_t = [1.852, 1.0, 1.613])]
    pub weights: Vec<f64>,

    /// Julian date of the first row, used when the target has no `jd` column
    #[arg(long)]
    pub start_jd: Option<f64>,

    /// Seconds between consecutive rows, with --start-jd
    #[arg(long, default_value_t = 30.0)]
    pub frame_gap: f64,

    /// Output CSV path
    #[arg(short, long, default_value = "magnitudes.csv")]
    pub output: PathBuf,
}

/// Fluxes of one light curve, one entry per row. Missing or unparsable
/// values are NaN.
#[derive(Debug)]
struct FluxTable {
    rgb: Vec<[f64; 3]>,
    jd: Vec<Option<f64>>,
}

/// One output row. Magnitudes are `None` where either flux is not positive.
#[derive(Debug, PartialEq)]
struct MagnitudeRow {
    jd: Option<f64>,
    gray: Option<f64>,
    rgb: [Option<f64>; 3],
}

pub fn run(args: &AnalyzeArgs) -> Result<()> {
    let columns = channel_columns(&args.columns)?;
    let weights: [f64; 3] = args
        .weights
        .as_slice()
        .try_into()
        .context("Expected three channel weights")?;

    let target = read_fluxes(&args.target, &columns)?;
    let reference = read_fluxes(&args.reference, &columns)?;
    let rows = magnitudes(&target, &reference, weights, args.reference_mag, args)?;

    write_magnitudes(&args.output, &rows)?;
    let measured = rows.iter().filter(|r| r.gray.is_some()).count();
    tracing::info!(rows = rows.len(), measured, "Magnitudes written");
    println!(
        "\nMagnitudes for {} of {} rows saved to {}",
        measured,
        rows.len(),
        args.output.display()
    );
    Ok(())
}

fn channel_columns(columns: &[String]) -> Result<[&str; 3]> {
    match columns {
        [r, g, b] => Ok([r.as_str(), g.as_str(), b.as_str()]),
        _ => bail!("Expected three flux columns, got {}", columns.len()),
    }
}

fn read_fluxes(path: &Path, columns: &[&str; 3]) -> Result<FluxTable> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let index = |name: &str| headers.iter().position(|h| h == name);

    let mut indices = [0usize; 3];
    for (slot, name) in indices.iter_mut().zip(columns) {
        *slot = index(*name)
            .with_context(|| format!("Column '{name}' not found in {}", path.display()))?;
    }
    let jd_index = index("jd");

    let parse = |field: Option<&str>| {
        field
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(f64::NAN)
    };

    let mut table = FluxTable {
        rgb: Vec::new(),
        jd: Vec::new(),
    };
    for record in reader.records() {
        let record = record.with_context(|| format!("Invalid row in {}", path.display()))?;
        table.rgb.push(indices.map(|i| parse(record.get(i))));
        table
            .jd
            .push(jd_index.map(|i| parse(record.get(i))).filter(|v| v.is_finite()));
    }
    Ok(table)
}

fn magnitudes(
    target: &FluxTable,
    reference: &FluxTable,
    weights: [f64; 3],
    reference_mag: f64,
    args: &AnalyzeArgs,
) -> Result<Vec<MagnitudeRow>> {
    if target.rgb.len() != reference.rgb.len() {
        bail!(
            "Target and reference have different row counts ({} vs {})",
            target.rgb.len(),
            reference.rgb.len()
        );
    }

    let mut rows = Vec::with_capacity(target.rgb.len());
    for (i, (t, r)) in target.rgb.iter().zip(&reference.rgb).enumerate() {
        let [tr, tg, tb] = *t;
        let [rr, rg, rb] = *r;
        let target_gray = weighted_channel_flux(tr, tg, tb, weights)?;
        let reference_gray = weighted_channel_flux(rr, rg, rb, weights)?;

        let jd = target.jd[i].or_else(|| {
            args.start_jd
                .map(|start| start + i as f64 * args.frame_gap * 1e6 / MICROS_PER_DAY)
        });
        rows.push(MagnitudeRow {
            jd,
            gray: differential_magnitude(target_gray, reference_gray, reference_mag),
            rgb: [0, 1, 2].map(|c| differential_magnitude(t[c], r[c], reference_mag)),
        });
    }
    Ok(rows)
}

fn write_magnitudes(path: &Path, rows: &[MagnitudeRow]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(["jd", "magnitude_gray", "magnitude_r", "magnitude_g", "magnitude_b"])?;

    let cell = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
    for row in rows {
        let [r, g, b] = row.rgb;
        writer.write_record([cell(row.jd), cell(row.gray), cell(r), cell(g), cell(b)])?;
    }
    writer.flush()?;
    Ok(())
}
