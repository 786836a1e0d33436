use std::path::Path;

use console::Style;
use lightcurve_core::calibration::{MasterFrame, NormalizedFlat};
use lightcurve_core::config::{CalibrationConfig, SessionConfig};
use lightcurve_core::frame::Channel;
use lightcurve_core::session::{RecordStatus, SessionOutput, TrackingMode};
use lightcurve_core::stats::median_of;

use crate::commands::calibrate::CalibrateArgs;
use crate::commands::photometry::PhotometryArgs;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }

    fn title(&self, text: &str) {
        println!();
        println!("  {}", self.title.apply_to(text));
        println!("  {}", self.title.apply_to("\u{2550}".repeat(text.chars().count())));
        println!();
    }

    fn master(&self, label: &str, dir: Option<&Path>) {
        match dir {
            Some(dir) => println!(
                "    {:<12}{}",
                self.label.apply_to(label),
                self.path.apply_to(dir.display())
            ),
            None => println!(
                "    {:<12}{}",
                self.label.apply_to(label),
                self.disabled.apply_to("none")
            ),
        }
    }
}

pub fn print_calibration_summary(args: &CalibrateArgs, config: &CalibrationConfig, lights: usize) {
    let s = Styles::new();
    s.title("Lightcurve Calibration");

    println!(
        "  {:<14}{} ({} frames)",
        s.label.apply_to("Lights"),
        s.path.apply_to(args.lights.display()),
        s.value.apply_to(lights)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(args.output.display())
    );
    println!();

    println!("  {}", s.header.apply_to("Masters"));
    s.master("Bias", args.bias.as_deref());
    s.master("Dark", args.dark.as_deref());
    s.master("Flat", args.flat.as_deref());
    s.master("Dark flat", args.dark_flat.as_deref());
    println!(
        "    {:<12}{}",
        s.label.apply_to("Combine"),
        s.method.apply_to(&config.combine)
    );
    println!();

    println!("  {}", s.header.apply_to("Correction"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Dark scale"),
        s.method.apply_to(&config.dark_scaling)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Flat floor"),
        s.value.apply_to(config.min_flat_value)
    );
    if config.clamp_negative {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Negatives"),
            s.value.apply_to("clamped to 0")
        );
    }
    println!();
}

pub fn print_masters(masters: &[&MasterFrame]) {
    if masters.is_empty() {
        return;
    }
    let s = Styles::new();
    println!();
    println!("  {}", s.header.apply_to("Masters built"));
    for master in masters {
        let means: Vec<String> = master.channel_means().iter().map(|m| format!("{m:.1}")).collect();
        println!(
            "    {:<12}{} frames, mean {}",
            s.label.apply_to(master.role.to_string()),
            s.value.apply_to(master.n_combined),
            s.value.apply_to(means.join(" / "))
        );
    }
}

pub fn print_calibration_result(
    flat: Option<&NormalizedFlat>,
    calibrated: usize,
    total: usize,
    output: &Path,
) {
    let s = Styles::new();
    println!();
    println!("  {}", s.header.apply_to("Result"));
    println!(
        "    {:<12}{} of {}",
        s.label.apply_to("Calibrated"),
        s.value.apply_to(calibrated),
        s.value.apply_to(total)
    );
    if let Some(flat) = flat {
        if flat.clamped_pixels > 0 {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Dead flat"),
                s.disabled.apply_to(format!(
                    "{} pixels clamped, flagged in photometry",
                    flat.clamped_positions.len()
                ))
            );
        }
    }
    println!();
    println!("  Calibrated frames saved to {}", s.path.apply_to(output.display()));
}

pub fn print_session_summary(
    args: &PhotometryArgs,
    config: &SessionConfig,
    mode: &TrackingMode,
    frames: usize,
) {
    let s = Styles::new();
    s.title("Lightcurve Photometry");

    println!(
        "  {:<14}{} ({} frames)",
        s.label.apply_to("Frames"),
        s.path.apply_to(args.frames.display()),
        s.value.apply_to(frames)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(args.output.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Target"),
        s.value.apply_to(format!("({:.2}, {:.2})", args.x, args.y))
    );
    println!();

    let a = &config.aperture;
    println!("  {}", s.header.apply_to("Aperture"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Source"),
        s.value.apply_to(format!("{} px", a.source))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Sky"),
        s.value.apply_to(format!("{} - {} px", a.inner_sky, a.outer_sky))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Sky clip"),
        s.value.apply_to(format!(
            "{} sigma, {} iterations",
            config.sky_clip.sigma, config.sky_clip.iterations
        ))
    );
    println!();

    println!("  {}", s.header.apply_to("Tracking"));
    match mode {
        TrackingMode::Manual(positions) => println!(
            "    {:<12}{} ({} positions)",
            s.label.apply_to("Mode"),
            s.method.apply_to("Manual"),
            positions.len()
        ),
        TrackingMode::Automatic => {
            let t = &config.tracking;
            println!(
                "    {:<12}{}",
                s.label.apply_to("Mode"),
                s.method.apply_to("Centroid")
            );
            println!(
                "    {:<12}{}",
                s.label.apply_to("Search"),
                s.value.apply_to(format!("{} px", t.search_radius))
            );
            println!(
                "    {:<12}{}",
                s.label.apply_to("Max move"),
                s.value.apply_to(format!("{} px", t.max_movement))
            );
            println!(
                "    {:<12}{}",
                s.label.apply_to("Weighting"),
                s.method.apply_to(t.weighting)
            );
            if t.motion_prediction {
                println!(
                    "    {:<12}{}",
                    s.label.apply_to("Prediction"),
                    s.method.apply_to("enabled")
                );
            }
        }
    }
    println!();
}

pub fn print_session_result(output: &SessionOutput, csv: &Path) {
    let s = Styles::new();
    let count = |status: RecordStatus| output.records.iter().filter(|r| r.status == status).count();

    println!();
    println!("  {}", s.header.apply_to("Result"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Measured"),
        s.value.apply_to(count(RecordStatus::Ok))
    );
    for (label, status) in [
        ("Stale", RecordStatus::Stale),
        ("Lost", RecordStatus::Lost),
        ("Failed", RecordStatus::Failed),
    ] {
        let n = count(status);
        if n > 0 {
            println!("    {:<12}{}", s.label.apply_to(label), s.disabled.apply_to(n));
        }
    }

    let mut snr: Vec<f64> = output
        .records
        .iter()
        .filter_map(|r| r.measurement(Channel::Gray).and_then(|m| m.snr))
        .collect();
    if !snr.is_empty() {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Median SNR"),
            s.value.apply_to(format!("{:.1}", median_of(&mut snr)))
        );
    }
    if output.cancelled {
        println!("    {}", s.disabled.apply_to("Stopped before the last frame"));
    }
    println!();
    println!("  Light curve saved to {}", s.path.apply_to(csv.display()));
}
