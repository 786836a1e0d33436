mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ndarray::{s, Array2};

use lightcurve_core::calibration::{
    build_master, calibrate, CalibrationMasters, CalibrationRole, Calibrator, MasterFrame,
};
use lightcurve_core::config::{CalibrationConfig, DarkScaling};
use lightcurve_core::error::PhotometryError;
use lightcurve_core::frame::PixelFrame;
use lightcurve_core::progress::{NoOpReporter, ProcessingStage, ProgressReporter};

use common::{corrected, ripple, uniform_frame, uniform_rgb, with_exposure};

fn master(frame: PixelFrame, role: CalibrationRole) -> MasterFrame {
    MasterFrame::from_frame(frame, role)
}

fn gradient_light(h: usize, w: usize) -> PixelFrame {
    PixelFrame::mono(Array2::from_shape_fn((h, w), |(r, c)| 1000.0 + r as f32 + 0.5 * c as f32))
}

// ---------------------------------------------------------------------------
// One-shot calibrate
// ---------------------------------------------------------------------------

#[test]
fn test_identity_calibration() {
    let light = gradient_light(12, 10);
    let bias = master(uniform_frame(12, 10, 0.0), CalibrationRole::Bias);
    let dark = master(uniform_frame(12, 10, 0.0), CalibrationRole::Dark);
    let flat = master(uniform_frame(12, 10, 1.0), CalibrationRole::Flat);

    let out = calibrate(&light, &bias, &dark, &flat, 1.0).unwrap();
    for (a, b) in out.data.iter().zip(light.data.iter()) {
        assert!((a - b).abs() < 1e-4);
    }
}

#[test]
fn test_bias_dark_flat_formula() {
    let light = gradient_light(8, 8);
    let bias = master(uniform_frame(8, 8, 100.0), CalibrationRole::Bias);
    let dark = master(uniform_frame(8, 8, 40.0), CalibrationRole::Dark);
    // Raw flat still contains bias and dark; normalizes to 1 after removal.
    let flat = master(uniform_frame(8, 8, 10_140.0), CalibrationRole::Flat);

    let out = calibrate(&light, &bias, &dark, &flat, 2.0).unwrap();
    for (a, b) in out.data.iter().zip(light.data.iter()) {
        assert!((a - (b - 100.0 - 80.0)).abs() < 1e-3);
    }
}

#[test]
fn test_does_not_mutate_input() {
    let light = gradient_light(8, 8);
    let before = light.data.clone();
    let bias = master(uniform_frame(8, 8, 100.0), CalibrationRole::Bias);
    let dark = master(uniform_frame(8, 8, 10.0), CalibrationRole::Dark);
    let flat = master(uniform_frame(8, 8, 5000.0), CalibrationRole::Flat);

    let out = calibrate(&light, &bias, &dark, &flat, 1.0).unwrap();
    assert_eq!(light.data, before);
    assert!(light.metadata.history.is_empty());
    assert_eq!(out.metadata.history.len(), 1);
    assert!(out.metadata.history[0].starts_with("Calibrated:"));
    assert!(out.metadata.provenance.bias_dark_removed);
    assert!(out.metadata.provenance.flat_fielded);
}

// ---------------------------------------------------------------------------
// Flat normalization
// ---------------------------------------------------------------------------

#[test]
fn test_non_uniform_flat() {
    let mut plane = Array2::from_elem((8, 8), 1.0f32);
    plane.slice_mut(s![.., 4..]).fill(3.0);
    let flat = master(corrected(PixelFrame::mono(plane)), CalibrationRole::Flat);

    let calibrator = Calibrator::new(
        CalibrationMasters {
            flat: Some(flat),
            ..Default::default()
        },
        CalibrationConfig::default(),
    )
    .unwrap();

    let normalized = calibrator.normalized_flat().unwrap();
    assert!((normalized.reference_mean - 2.0).abs() < 1e-9);

    let out = calibrator.calibrate_frame(&uniform_frame(8, 8, 300.0)).unwrap();
    assert!((out.data[[0, 0, 0]] - 600.0).abs() < 1e-3);
    assert!((out.data[[0, 0, 7]] - 200.0).abs() < 1e-3);
}

#[test]
fn test_rgb_flat_shares_reference_mean() {
    let flat = master(
        corrected(uniform_rgb(6, 6, [1000.0, 2000.0, 4000.0])),
        CalibrationRole::Flat,
    );
    let calibrator = Calibrator::new(
        CalibrationMasters {
            flat: Some(flat),
            ..Default::default()
        },
        CalibrationConfig::default(),
    )
    .unwrap();

    let normalized = calibrator.normalized_flat().unwrap();
    assert!((normalized.reference_mean - 1000.0).abs() < 1e-6);

    let out = calibrator
        .calibrate_frame(&uniform_rgb(6, 6, [400.0, 400.0, 400.0]))
        .unwrap();
    assert!((out.data[[0, 3, 3]] - 400.0).abs() < 1e-3);
    assert!((out.data[[1, 3, 3]] - 200.0).abs() < 1e-3);
    assert!((out.data[[2, 3, 3]] - 100.0).abs() < 1e-3);
}

#[test]
fn test_flat_with_zero_mean_rejected() {
    let flat = master(corrected(uniform_frame(4, 4, 0.0)), CalibrationRole::Flat);
    let result = Calibrator::new(
        CalibrationMasters {
            flat: Some(flat),
            ..Default::default()
        },
        CalibrationConfig::default(),
    );
    assert!(matches!(result, Err(PhotometryError::InvalidFrame(_))));
}

#[test]
fn test_dead_flat_pixel_clamped() {
    let mut plane = Array2::from_elem((4, 4), 1000.0f32);
    plane[[1, 1]] = 0.0;
    let flat = master(corrected(PixelFrame::mono(plane)), CalibrationRole::Flat);
    let calibrator = Calibrator::new(
        CalibrationMasters {
            flat: Some(flat),
            ..Default::default()
        },
        CalibrationConfig::default(),
    )
    .unwrap();
    assert_eq!(calibrator.normalized_flat().unwrap().clamped_pixels, 1);

    let out = calibrator.calibrate_frame(&uniform_frame(4, 4, 10.0)).unwrap();
    assert!(out.data.iter().all(|v| v.is_finite()));
    assert_eq!(out.metadata.bad_pixels, vec![(1, 1)]);
}

#[test]
fn test_healthy_flat_marks_no_bad_pixels() {
    let flat = master(corrected(uniform_frame(4, 4, 1000.0)), CalibrationRole::Flat);
    let calibrator = Calibrator::new(
        CalibrationMasters {
            flat: Some(flat),
            ..Default::default()
        },
        CalibrationConfig::default(),
    )
    .unwrap();
    let out = calibrator.calibrate_frame(&uniform_frame(4, 4, 10.0)).unwrap();
    assert!(out.metadata.bad_pixels.is_empty());
}

// ---------------------------------------------------------------------------
// Flat preparation and ordering
// ---------------------------------------------------------------------------

#[test]
fn test_flat_pipeline_does_not_subtract_twice() {
    let bias = master(uniform_frame(8, 8, 100.0), CalibrationRole::Bias);
    let dark_flat = master(uniform_frame(8, 8, 20.0), CalibrationRole::DarkFlat);
    let preparer = Calibrator::new(
        CalibrationMasters {
            bias: Some(bias.clone()),
            ..Default::default()
        },
        CalibrationConfig::default(),
    )
    .unwrap();

    let raw_flats: Vec<PixelFrame> = (0..3).map(|_| uniform_frame(8, 8, 5000.0)).collect();
    let prepared: Vec<PixelFrame> = raw_flats
        .iter()
        .map(|f| preparer.correct_flat_frame(f, Some(&dark_flat)).unwrap())
        .collect();
    assert!(prepared.iter().all(|f| f.metadata.provenance.bias_dark_removed));
    assert!((prepared[0].data[[0, 0, 0]] - 4880.0).abs() < 1e-3);

    let flat = build_master(&prepared, CalibrationRole::Flat).unwrap();
    let dark = master(uniform_frame(8, 8, 30.0), CalibrationRole::Dark);
    let calibrator = Calibrator::new(
        CalibrationMasters {
            bias: Some(bias),
            dark: Some(dark),
            flat: Some(flat),
        },
        CalibrationConfig::default(),
    )
    .unwrap();
    let normalized = calibrator.normalized_flat().unwrap();
    assert!((normalized.reference_mean - 4880.0).abs() < 1e-3);
    assert!(normalized.data.iter().all(|&v| (v - 1.0).abs() < 1e-6));
}

#[test]
fn test_correct_flat_needs_a_master() {
    let calibrator = Calibrator::new(CalibrationMasters::default(), CalibrationConfig::default()).unwrap();
    assert!(matches!(
        calibrator.correct_flat_frame(&uniform_frame(4, 4, 1.0), None),
        Err(PhotometryError::InvalidParameter(_))
    ));
}

#[test]
fn test_correct_flat_rejects_wrong_role() {
    let calibrator = Calibrator::new(CalibrationMasters::default(), CalibrationConfig::default()).unwrap();
    let bias = master(uniform_frame(4, 4, 1.0), CalibrationRole::Bias);
    assert!(matches!(
        calibrator.correct_flat_frame(&uniform_frame(4, 4, 1.0), Some(&bias)),
        Err(PhotometryError::InvalidParameter(_))
    ));
}

// ---------------------------------------------------------------------------
// Dark scaling
// ---------------------------------------------------------------------------

fn dark_only(dark: MasterFrame, dark_scaling: DarkScaling) -> Calibrator {
    Calibrator::new(
        CalibrationMasters {
            dark: Some(dark),
            ..Default::default()
        },
        CalibrationConfig {
            dark_scaling,
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn test_dark_scale_from_exposure() {
    let dark = master(with_exposure(uniform_frame(4, 4, 10.0), 30.0, 0), CalibrationRole::Dark);
    let calibrator = dark_only(dark, DarkScaling::FromExposure);
    let light = with_exposure(uniform_frame(4, 4, 500.0), 60.0, 0);
    let out = calibrator.calibrate_frame(&light).unwrap();
    assert!(out.data.iter().all(|&v| (v - 480.0).abs() < 1e-3));
}

#[test]
fn test_dark_scale_missing_exposure_defaults_to_one() {
    let dark = master(uniform_frame(4, 4, 10.0), CalibrationRole::Dark);
    let calibrator = dark_only(dark, DarkScaling::FromExposure);
    let out = calibrator.calibrate_frame(&uniform_frame(4, 4, 500.0)).unwrap();
    assert!(out.data.iter().all(|&v| (v - 490.0).abs() < 1e-3));
}

#[test]
fn test_dark_scale_optimized() {
    let dark_plane = Array2::from_shape_fn((16, 16), |(r, c)| 10.0 + ripple(r, c, 2.0));
    let light_plane = dark_plane.mapv(|d| 100.0 + 2.0 * d);
    let bias = master(uniform_frame(16, 16, 100.0), CalibrationRole::Bias);
    let dark = master(PixelFrame::mono(dark_plane), CalibrationRole::Dark);

    let calibrator = Calibrator::new(
        CalibrationMasters {
            bias: Some(bias),
            dark: Some(dark.clone()),
            flat: None,
        },
        CalibrationConfig {
            dark_scaling: DarkScaling::Optimized,
            ..Default::default()
        },
    )
    .unwrap();

    let light = PixelFrame::mono(light_plane);
    let scales = calibrator.dark_scales(&light, &dark).unwrap();
    assert_eq!(scales.len(), 1);
    assert!((scales[0] - 2.0).abs() < 1e-4);

    let out = calibrator.calibrate_frame(&light).unwrap();
    assert!(out.data.iter().all(|v| v.abs() < 1e-3));
}

#[test]
fn test_dark_scale_optimized_is_clamped() {
    let dark = master(uniform_frame(8, 8, 10.0), CalibrationRole::Dark);
    let calibrator = dark_only(dark.clone(), DarkScaling::Optimized);
    let light = uniform_frame(8, 8, 200.0);
    let scales = calibrator.dark_scales(&light, &dark).unwrap();
    assert!((scales[0] - 5.0).abs() < 1e-9);
}

#[test]
fn test_clamp_negative() {
    let bias = master(uniform_frame(4, 4, 100.0), CalibrationRole::Bias);
    let calibrator = Calibrator::new(
        CalibrationMasters {
            bias: Some(bias),
            ..Default::default()
        },
        CalibrationConfig {
            clamp_negative: true,
            ..Default::default()
        },
    )
    .unwrap();
    let out = calibrator.calibrate_frame(&uniform_frame(4, 4, 50.0)).unwrap();
    assert!(out.data.iter().all(|&v| v == 0.0));
}

// ---------------------------------------------------------------------------
// Shapes and batches
// ---------------------------------------------------------------------------

#[test]
fn test_master_shape_mismatch() {
    let result = Calibrator::new(
        CalibrationMasters {
            bias: Some(master(uniform_frame(8, 8, 1.0), CalibrationRole::Bias)),
            dark: Some(master(uniform_frame(8, 9, 1.0), CalibrationRole::Dark)),
            flat: None,
        },
        CalibrationConfig::default(),
    );
    assert!(matches!(result, Err(PhotometryError::ShapeMismatch { .. })));
}

#[test]
fn test_light_shape_mismatch() {
    let calibrator = Calibrator::new(
        CalibrationMasters {
            bias: Some(master(uniform_frame(8, 8, 1.0), CalibrationRole::Bias)),
            ..Default::default()
        },
        CalibrationConfig::default(),
    )
    .unwrap();
    assert!(matches!(
        calibrator.calibrate_frame(&uniform_frame(4, 4, 1.0)),
        Err(PhotometryError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_no_masters_passes_through() {
    let calibrator = Calibrator::new(CalibrationMasters::default(), CalibrationConfig::default()).unwrap();
    let light = gradient_light(4, 4);
    let out = calibrator.calibrate_frame(&light).unwrap();
    assert_eq!(out.data, light.data);
    assert_eq!(out.metadata.history, vec!["Calibrated: no masters applied".to_string()]);
}

#[test]
fn test_batch_preserves_order() {
    let bias = master(uniform_frame(4, 4, 1.0), CalibrationRole::Bias);
    let calibrator = Calibrator::new(
        CalibrationMasters {
            bias: Some(bias),
            ..Default::default()
        },
        CalibrationConfig::default(),
    )
    .unwrap();
    let lights: Vec<PixelFrame> = (0..6).map(|i| uniform_frame(4, 4, 10.0 * (i + 1) as f32)).collect();
    let outputs = calibrator.calibrate_batch(&lights, &NoOpReporter);
    assert_eq!(outputs.len(), 6);
    for (i, out) in outputs.into_iter().enumerate() {
        let out = out.unwrap();
        assert!((out.data[[0, 0, 0]] - (10.0 * (i + 1) as f32 - 1.0)).abs() < 1e-4);
    }
}

#[derive(Default)]
struct StageLog {
    stages: Mutex<Vec<(ProcessingStage, Option<usize>)>>,
    highest: AtomicUsize,
    finished: AtomicUsize,
}

impl ProgressReporter for StageLog {
    fn begin_stage(&self, stage: ProcessingStage, total_items: Option<usize>) {
        self.stages.lock().unwrap().push((stage, total_items));
    }

    fn advance(&self, items_done: usize) {
        self.highest.fetch_max(items_done, Ordering::Relaxed);
    }

    fn finish_stage(&self) {
        self.finished.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_batch_reports_calibrating_stage() {
    let calibrator = Calibrator::new(CalibrationMasters::default(), CalibrationConfig::default()).unwrap();
    let lights: Vec<PixelFrame> = (0..5).map(|_| uniform_frame(4, 4, 10.0)).collect();
    let log = StageLog::default();

    let outputs = calibrator.calibrate_batch(&lights, &log);
    assert_eq!(outputs.len(), 5);
    assert_eq!(*log.stages.lock().unwrap(), vec![(ProcessingStage::Calibrating, Some(5))]);
    assert_eq!(log.highest.load(Ordering::Relaxed), 5);
    assert_eq!(log.finished.load(Ordering::Relaxed), 1);
}
