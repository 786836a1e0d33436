mod common;

use lightcurve_core::config::{CentroidWeighting, TrackingConfig};
use lightcurve_core::error::PhotometryError;
use lightcurve_core::frame::{PixelFrame, PixelPos};
use lightcurve_core::tracking::{
    adaptive_threshold_sigma, refine_centroid, CenterDecision, CenterOutcome, CenterProvider,
    CentroidTracker, ManualTracker, TrackState, TrackStatus,
};

use common::{star_frame, uniform_frame};

const H: usize = 120;
const W: usize = 160;

fn star_at(x: f64, y: f64) -> PixelFrame {
    star_frame(H, W, 100.0, PixelPos::new(x, y), 20_000.0)
}

/// Feed `frames` through `provider`, returning every decision and the
/// final state.
fn run(
    provider: &dyn CenterProvider,
    mut state: TrackState,
    frames: &[PixelFrame],
) -> (Vec<CenterDecision>, TrackState) {
    let mut decisions = Vec::new();
    for frame in frames {
        let (next, decision) = provider.locate(&state, frame).unwrap();
        state = next;
        decisions.push(decision);
    }
    (decisions, state)
}

// ---------------------------------------------------------------------------
// Centroid refinement
// ---------------------------------------------------------------------------

#[test]
fn test_refine_centroid_subpixel() {
    let frame = star_at(70.3, 50.7);
    let plane = frame.plane(0);
    let est = refine_centroid(&plane, PixelPos::new(68.0, 53.0), &TrackingConfig::default()).unwrap();
    assert!((est.center.x - 70.3).abs() < 0.05);
    assert!((est.center.y - 50.7).abs() < 0.05);
    assert!((est.background_median - 100.0).abs() < 1e-3);
    assert!(est.is_significant(3.0));
}

#[test]
fn test_refine_centroid_power_weighting() {
    let frame = star_at(70.0, 50.0);
    let config = TrackingConfig {
        weighting: CentroidWeighting::Power(2.0),
        ..Default::default()
    };
    let est = refine_centroid(&frame.plane(0), PixelPos::new(72.0, 48.0), &config).unwrap();
    assert!((est.center.x - 70.0).abs() < 0.05);
    assert!((est.center.y - 50.0).abs() < 0.05);
}

#[test]
fn test_refine_centroid_blank_window() {
    let frame = uniform_frame(H, W, 100.0);
    assert!(refine_centroid(&frame.plane(0), PixelPos::new(50.0, 50.0), &TrackingConfig::default()).is_none());
}

#[test]
fn test_refine_centroid_outside_frame() {
    let frame = star_at(70.0, 50.0);
    assert!(refine_centroid(&frame.plane(0), PixelPos::new(-100.0, -100.0), &TrackingConfig::default()).is_none());
}

#[test]
fn test_adaptive_threshold_sigma() {
    assert!((adaptive_threshold_sigma(200.0, 100.0, 1.0) - 2.0).abs() < 1e-12);
    assert!((adaptive_threshold_sigma(107.0, 100.0, 1.0) - 2.5).abs() < 1e-12);
    assert!((adaptive_threshold_sigma(102.0, 100.0, 1.0) - 3.0).abs() < 1e-12);
}

// ---------------------------------------------------------------------------
// Automatic tracking
// ---------------------------------------------------------------------------

#[test]
fn test_seed_used_for_first_frame() {
    let tracker = CentroidTracker::default();
    let seed = PixelPos::new(60.0, 60.0);
    let (next, decision) = tracker.locate(&TrackState::seeded(seed), &star_at(61.0, 60.0)).unwrap();
    assert_eq!(decision.outcome, CenterOutcome::Seeded);
    assert_eq!(decision.center, seed);
    assert!(decision.movement.abs() < 1e-12);
    assert_eq!(next.status, TrackStatus::Tracking);
    assert_eq!(next.frame_index, 1);
}

#[test]
fn test_follows_slow_drift() {
    // 3 px per frame for 12 frames.
    let frames: Vec<PixelFrame> = (0..12).map(|i| star_at(40.0 + 3.0 * i as f64, 50.0)).collect();
    let tracker = CentroidTracker::default();
    let (decisions, state) = run(&tracker, TrackState::seeded(PixelPos::new(40.0, 50.0)), &frames);

    assert_eq!(state.status, TrackStatus::Tracking);
    assert_eq!(state.consecutive_failures, 0);
    for (i, d) in decisions.iter().enumerate().skip(1) {
        assert_eq!(d.outcome, CenterOutcome::Accepted, "frame {i}");
        assert!((d.center.x - (40.0 + 3.0 * i as f64)).abs() < 0.05);
        assert!((d.center.y - 50.0).abs() < 0.05);
        assert!((d.movement - 3.0).abs() < 0.1);
    }
}

#[test]
fn test_large_jump_is_stale() {
    let tracker = CentroidTracker::default();
    let seed = PixelPos::new(60.0, 60.0);
    let frames = vec![star_at(60.0, 60.0), star_at(60.0, 60.0), star_at(80.0, 60.0)];
    let (decisions, state) = run(&tracker, TrackState::seeded(seed), &frames);

    let before_jump = decisions[1].center;
    let jump = &decisions[2];
    assert!(matches!(jump.outcome, CenterOutcome::Stale { .. }));
    assert!(!jump.outcome.is_tracked());
    assert_eq!(jump.center, before_jump);
    assert_eq!(state.last_valid_center, Some(before_jump));
    assert_eq!(state.consecutive_failures, 1);
    assert_eq!(state.status, TrackStatus::Tracking);
}

#[test]
fn test_recovers_after_stale_frame() {
    let tracker = CentroidTracker::default();
    let frames = vec![
        star_at(60.0, 60.0),
        uniform_frame(H, W, 100.0),
        star_at(61.0, 60.0),
    ];
    let (decisions, state) = run(&tracker, TrackState::seeded(PixelPos::new(60.0, 60.0)), &frames);
    assert!(matches!(decisions[1].outcome, CenterOutcome::Stale { .. }));
    assert_eq!(decisions[2].outcome, CenterOutcome::Accepted);
    assert_eq!(state.consecutive_failures, 0);
}

#[test]
fn test_lost_after_too_many_failures() {
    let config = TrackingConfig {
        max_consecutive_failures: 3,
        ..Default::default()
    };
    let tracker = CentroidTracker::new(config);
    let mut frames = vec![star_at(60.0, 60.0)];
    frames.extend((0..6).map(|_| uniform_frame(H, W, 100.0)));

    let (decisions, state) = run(&tracker, TrackState::seeded(PixelPos::new(60.0, 60.0)), &frames);
    for d in &decisions[1..4] {
        assert!(matches!(d.outcome, CenterOutcome::Stale { .. }));
    }
    assert_eq!(decisions[4].outcome, CenterOutcome::Lost { failures: 4 });
    assert_eq!(decisions[6].outcome, CenterOutcome::Lost { failures: 6 });
    assert_eq!(state.status, TrackStatus::Lost);
    assert_eq!(state.last_valid_center, Some(PixelPos::new(60.0, 60.0)));
}

#[test]
fn test_lost_track_ignores_visible_star_until_reseed() {
    let config = TrackingConfig {
        max_consecutive_failures: 0,
        ..Default::default()
    };
    let tracker = CentroidTracker::new(config);
    let frames = vec![star_at(60.0, 60.0), uniform_frame(H, W, 100.0), star_at(60.0, 60.0)];
    let (decisions, state) = run(&tracker, TrackState::seeded(PixelPos::new(60.0, 60.0)), &frames);
    assert!(matches!(decisions[1].outcome, CenterOutcome::Lost { .. }));
    assert!(matches!(decisions[2].outcome, CenterOutcome::Lost { .. }));

    let state = state.reseed(PixelPos::new(90.0, 70.0));
    assert_eq!(state.status, TrackStatus::Seeking);
    assert_eq!(state.consecutive_failures, 0);
    let (next, decision) = tracker.locate(&state, &star_at(90.0, 70.0)).unwrap();
    assert_eq!(decision.outcome, CenterOutcome::Seeded);
    assert!((decision.movement - PixelPos::new(60.0, 60.0).distance_to(&PixelPos::new(90.0, 70.0))).abs() < 1e-9);
    assert_eq!(next.status, TrackStatus::Tracking);
}

#[test]
fn test_edge_margin_rejects() {
    let tracker = CentroidTracker::default();
    // Star drifts to 3 px from the left border.
    let frames = vec![star_at(8.0, 60.0), star_at(3.0, 60.0)];
    let (decisions, _) = run(&tracker, TrackState::seeded(PixelPos::new(8.0, 60.0)), &frames);
    match &decisions[1].outcome {
        CenterOutcome::Stale { reason } => assert!(reason.contains("edge")),
        other => panic!("expected stale, got {other:?}"),
    }
}

#[test]
fn test_unseeded_state_errors() {
    let tracker = CentroidTracker::default();
    assert!(matches!(
        tracker.locate(&TrackState::seeking(), &star_at(60.0, 60.0)),
        Err(PhotometryError::InvalidParameter(_))
    ));
}

#[test]
fn test_locate_leaves_input_state_untouched() {
    let tracker = CentroidTracker::default();
    let state = TrackState::seeded(PixelPos::new(60.0, 60.0));
    let copy = state.clone();
    let _ = tracker.locate(&state, &star_at(60.0, 60.0)).unwrap();
    assert_eq!(state, copy);
}

// ---------------------------------------------------------------------------
// Motion prediction
// ---------------------------------------------------------------------------

#[test]
fn test_predicted_center() {
    let mut state = TrackState::seeded(PixelPos::new(10.0, 10.0));
    state.history.push_back(PixelPos::new(14.0, 12.0));
    state.history.push_back(PixelPos::new(18.0, 14.0));
    let p = state.predicted_center().unwrap();
    assert!((p.x - 22.0).abs() < 1e-12);
    assert!((p.y - 16.0).abs() < 1e-12);
}

#[test]
fn test_prediction_tracks_fast_mover() {
    let config = TrackingConfig {
        search_radius: 10.0,
        motion_prediction: true,
        ..Default::default()
    };
    let tracker = CentroidTracker::new(config);
    let frames: Vec<PixelFrame> = (0..8).map(|i| star_at(30.0 + 8.0 * i as f64, 60.0)).collect();
    let (decisions, state) = run(&tracker, TrackState::seeded(PixelPos::new(30.0, 60.0)), &frames);
    assert_eq!(state.status, TrackStatus::Tracking);
    for (i, d) in decisions.iter().enumerate().skip(2) {
        assert_eq!(d.outcome, CenterOutcome::Accepted);
        assert!((d.center.x - (30.0 + 8.0 * i as f64)).abs() < 0.05);
    }
}

// ---------------------------------------------------------------------------
// Manual mode
// ---------------------------------------------------------------------------

#[test]
fn test_manual_positions_and_movement() {
    let positions = vec![
        PixelPos::new(10.0, 10.0),
        PixelPos::new(13.0, 14.0),
        PixelPos::new(13.0, 14.0),
    ];
    let tracker = ManualTracker::new(positions.clone());
    let frames: Vec<PixelFrame> = (0..3).map(|_| uniform_frame(40, 40, 0.0)).collect();
    let (decisions, state) = run(&tracker, TrackState::seeded(positions[0]), &frames);

    assert!(decisions.iter().all(|d| d.outcome == CenterOutcome::Manual));
    assert!(decisions[0].movement.abs() < 1e-12);
    assert!((decisions[1].movement - 5.0).abs() < 1e-12);
    assert!(decisions[2].movement.abs() < 1e-12);
    assert_eq!(state.current_center, Some(positions[2]));
}

#[test]
fn test_manual_missing_position() {
    let tracker = ManualTracker::new(vec![PixelPos::new(10.0, 10.0)]);
    let mut state = TrackState::seeded(PixelPos::new(10.0, 10.0));
    state.frame_index = 1;
    assert_eq!(
        tracker.locate(&state, &uniform_frame(40, 40, 0.0)).unwrap_err(),
        PhotometryError::MissingManualPosition { index: 1 }
    );
}
