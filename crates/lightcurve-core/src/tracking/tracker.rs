use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TrackingConfig;
use crate::consts::TRACK_HISTORY_LEN;
use crate::error::{PhotometryError, Result};
use crate::frame::{Channel, PixelFrame, PixelPos};

use super::centroid::{refine_centroid, CentroidEstimate};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackStatus {
    /// Waiting for a seed, or holding one that has not been used yet.
    Seeking,
    Tracking,
    /// Too many consecutive rejections; only a re-seed recovers.
    Lost,
}

impl std::fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seeking => write!(f, "Seeking"),
            Self::Tracking => write!(f, "Tracking"),
            Self::Lost => write!(f, "Lost"),
        }
    }
}

/// Tracker state between frames. Advanced exactly one frame per
/// [`CenterProvider::locate`] call.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackState {
    /// Center recorded for the previous frame.
    pub current_center: Option<PixelPos>,
    /// Last center that passed validation (or the seed).
    pub last_valid_center: Option<PixelPos>,
    pub consecutive_failures: u32,
    /// Index of the next frame to be processed.
    pub frame_index: usize,
    pub status: TrackStatus,
    /// Recently accepted centers, oldest first.
    pub history: VecDeque<PixelPos>,
}

impl Default for TrackState {
    fn default() -> Self {
        Self::seeking()
    }
}

impl TrackState {
    /// A state with no target yet.
    pub fn seeking() -> Self {
        Self {
            current_center: None,
            last_valid_center: None,
            consecutive_failures: 0,
            frame_index: 0,
            status: TrackStatus::Seeking,
            history: VecDeque::with_capacity(TRACK_HISTORY_LEN),
        }
    }

    /// A fresh state holding `seed`, used as-is for the first frame.
    pub fn seeded(seed: PixelPos) -> Self {
        Self::seeking().reseed(seed)
    }

    /// Restart tracking from `seed` at the current frame index. Failures and
    /// motion history are cleared; the previously recorded center is kept so
    /// movement stays relative to the last frame.
    pub fn reseed(self, seed: PixelPos) -> Self {
        Self {
            current_center: self.current_center,
            last_valid_center: Some(seed),
            consecutive_failures: 0,
            frame_index: self.frame_index,
            status: TrackStatus::Seeking,
            history: VecDeque::from([seed]),
        }
    }

    /// Advance past a frame that produced no center.
    pub fn skip_frame(mut self) -> Self {
        self.frame_index += 1;
        self
    }

    /// Position extrapolated from the mean velocity of the recent history.
    pub fn predicted_center(&self) -> Option<PixelPos> {
        let last = *self.history.back()?;
        let first = *self.history.front()?;
        let steps = self.history.len().saturating_sub(1);
        if steps == 0 {
            return Some(last);
        }
        let n = steps as f64;
        Some(PixelPos::new(
            last.x + (last.x - first.x) / n,
            last.y + (last.y - first.y) / n,
        ))
    }

    fn movement_to(&self, center: PixelPos) -> f64 {
        self.current_center
            .map(|prev| prev.distance_to(&center))
            .unwrap_or(0.0)
    }

    fn push_history(&mut self, center: PixelPos) {
        if self.history.len() == TRACK_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(center);
    }
}

/// How the center of one frame was obtained.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CenterOutcome {
    /// The external seed, used directly.
    Seeded,
    /// A refined centroid that passed validation.
    Accepted,
    /// Supplied by the caller in manual mode.
    Manual,
    /// Refinement rejected; the last valid center is reused.
    Stale { reason: String },
    /// Too many consecutive rejections.
    Lost { failures: u32 },
}

impl CenterOutcome {
    /// Whether the center reflects this frame rather than an earlier one.
    pub fn is_tracked(&self) -> bool {
        matches!(self, Self::Seeded | Self::Accepted | Self::Manual)
    }
}

/// Center chosen for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct CenterDecision {
    pub center: PixelPos,
    /// Distance from the center recorded for the previous frame.
    pub movement: f64,
    pub outcome: CenterOutcome,
}

/// Chooses the aperture center for each frame of a session.
///
/// Implementations are pure: the state for the next frame is returned
/// alongside the decision and the input state is left untouched.
pub trait CenterProvider: Send + Sync {
    fn locate(&self, state: &TrackState, frame: &PixelFrame) -> Result<(TrackState, CenterDecision)>;
}

/// Automatic tracking by thresholded centroid refinement with validation.
#[derive(Clone, Debug, Default)]
pub struct CentroidTracker {
    pub config: TrackingConfig,
}

impl CentroidTracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self { config }
    }

    /// Why `estimate` cannot be accepted, if it cannot.
    fn rejection(
        &self,
        estimate: &CentroidEstimate,
        last_valid: PixelPos,
        frame: &PixelFrame,
    ) -> Option<String> {
        let cfg = &self.config;
        if !estimate.is_significant(cfg.validation_sigma) {
            return Some(format!(
                "center value {:.1} not {} sigma above background {:.1} (sigma {:.2})",
                estimate.center_value,
                cfg.validation_sigma,
                estimate.background_median,
                estimate.background_sigma
            ));
        }
        let displacement = estimate.center.distance_to(&last_valid);
        if displacement > cfg.max_movement {
            return Some(format!(
                "moved {displacement:.2} px, limit {} px",
                cfg.max_movement
            ));
        }
        let c = estimate.center;
        let max_x = frame.width() as f64 - 1.0 - cfg.edge_margin;
        let max_y = frame.height() as f64 - 1.0 - cfg.edge_margin;
        if c.x < cfg.edge_margin || c.y < cfg.edge_margin || c.x > max_x || c.y > max_y {
            return Some(format!(
                "center {c} within {} px of the frame edge",
                cfg.edge_margin
            ));
        }
        None
    }
}

impl CenterProvider for CentroidTracker {
    fn locate(&self, state: &TrackState, frame: &PixelFrame) -> Result<(TrackState, CenterDecision)> {
        let Some(last_valid) = state.last_valid_center else {
            return Err(PhotometryError::InvalidParameter(
                "automatic tracking needs a seed position".into(),
            ));
        };

        let mut next = state.clone();
        next.frame_index += 1;

        match state.status {
            TrackStatus::Seeking => {
                let movement = state.movement_to(last_valid);
                next.current_center = Some(last_valid);
                next.status = TrackStatus::Tracking;
                debug!(frame = state.frame_index, center = %last_valid, "Seed accepted");
                Ok((
                    next,
                    CenterDecision {
                        center: last_valid,
                        movement,
                        outcome: CenterOutcome::Seeded,
                    },
                ))
            }
            TrackStatus::Lost => {
                next.consecutive_failures += 1;
                next.current_center = Some(last_valid);
                let failures = next.consecutive_failures;
                Ok((
                    next,
                    CenterDecision {
                        center: last_valid,
                        movement: state.movement_to(last_valid),
                        outcome: CenterOutcome::Lost { failures },
                    },
                ))
            }
            TrackStatus::Tracking => {
                let search_center = if self.config.motion_prediction {
                    state.predicted_center().unwrap_or(last_valid)
                } else {
                    last_valid
                };
                let gray = frame.channel_data(Channel::Gray)?;
                let estimate = refine_centroid(&gray.view(), search_center, &self.config);

                let reason = match estimate {
                    Some(ref est) => self.rejection(est, last_valid, frame),
                    None => Some("no signal above threshold in search window".to_string()),
                };

                if let (Some(est), None) = (estimate, &reason) {
                    let movement = state.movement_to(est.center);
                    next.current_center = Some(est.center);
                    next.last_valid_center = Some(est.center);
                    next.consecutive_failures = 0;
                    next.push_history(est.center);
                    debug!(
                        frame = state.frame_index,
                        center = %est.center,
                        movement,
                        "Centroid accepted"
                    );
                    return Ok((
                        next,
                        CenterDecision {
                            center: est.center,
                            movement,
                            outcome: CenterOutcome::Accepted,
                        },
                    ));
                }

                let reason = reason.unwrap_or_default();
                next.consecutive_failures += 1;
                next.current_center = Some(last_valid);
                let movement = state.movement_to(last_valid);

                if next.consecutive_failures > self.config.max_consecutive_failures {
                    next.status = TrackStatus::Lost;
                    warn!(
                        frame = state.frame_index,
                        failures = next.consecutive_failures,
                        "Track lost"
                    );
                    let failures = next.consecutive_failures;
                    return Ok((
                        next,
                        CenterDecision {
                            center: last_valid,
                            movement,
                            outcome: CenterOutcome::Lost { failures },
                        },
                    ));
                }

                debug!(
                    frame = state.frame_index,
                    failures = next.consecutive_failures,
                    %reason,
                    "Centroid rejected, reusing last valid center"
                );
                Ok((
                    next,
                    CenterDecision {
                        center: last_valid,
                        movement,
                        outcome: CenterOutcome::Stale { reason },
                    },
                ))
            }
        }
    }
}

/// Manual sequential mode: one caller-supplied center per frame, no
/// validation.
#[derive(Clone, Debug, Default)]
pub struct ManualTracker {
    pub positions: Vec<PixelPos>,
}

impl ManualTracker {
    pub fn new(positions: Vec<PixelPos>) -> Self {
        Self { positions }
    }
}

impl CenterProvider for ManualTracker {
    fn locate(&self, state: &TrackState, _frame: &PixelFrame) -> Result<(TrackState, CenterDecision)> {
        let index = state.frame_index;
        let center = self
            .positions
            .get(index)
            .copied()
            .filter(PixelPos::is_finite)
            .ok_or(PhotometryError::MissingManualPosition { index })?;

        let movement = state.movement_to(center);
        let mut next = state.clone();
        next.frame_index += 1;
        next.current_center = Some(center);
        next.last_valid_center = Some(center);
        next.consecutive_failures = 0;
        next.status = TrackStatus::Tracking;
        next.push_history(center);

        Ok((
            next,
            CenterDecision {
                center,
                movement,
                outcome: CenterOutcome::Manual,
            },
        ))
    }
}
