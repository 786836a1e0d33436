//! Tracking and photometry across an ordered frame sequence.
//!
//! Every input frame yields exactly one [`PhotometryRecord`]. Failures inside
//! a frame (a rejected centroid, a lost track, an aperture that falls off the
//! frame) are recorded on that frame's record instead of aborting the run.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{PhotometryError, Result};
use crate::frame::{Channel, PixelFrame, PixelPos};
use crate::photometry::{julian_date, ApertureRadii, FluxMeasurement, PhotometryMeasurer};
use crate::progress::{CancelToken, ProcessingStage, ProgressReporter};
use crate::tracking::{
    CenterDecision, CenterOutcome, CenterProvider, CentroidTracker, ManualTracker, TrackState,
};

/// How the aperture center is chosen on each frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TrackingMode {
    /// Centroid tracking from the seed.
    Automatic,
    /// One caller-supplied center per frame, in frame order.
    Manual(Vec<PixelPos>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Ok,
    /// Measured at the last valid center after a rejected centroid.
    Stale,
    /// The track is lost; nothing was measured.
    Lost,
    /// The frame could not be measured.
    Failed,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Stale => write!(f, "stale"),
            Self::Lost => write!(f, "lost"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One flattened output value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Int(usize),
    Float(f64),
    Bool(bool),
    Text(String),
    Empty,
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::Empty => Ok(()),
        }
    }
}

const RECORD_COLUMNS: [&str; 14] = [
    "image_index",
    "x_position",
    "y_position",
    "tracked_position",
    "movement_pixels",
    "aperture_area",
    "sky_annulus_area",
    "status",
    "error",
    "exposure_s",
    "filter",
    "date_obs",
    "jd",
    "flagged_pixels",
];

const CHANNEL_COLUMNS: [&str; 10] = [
    "star_flux_raw",
    "flux_corrected",
    "sky_background_total",
    "sky_per_pixel",
    "sky_std",
    "poisson_noise",
    "total_noise",
    "snr",
    "instrumental_mag",
    "mag_err",
];

/// Stable header for records measured on frames with `channels`.
pub fn column_names(channels: &[Channel]) -> Vec<String> {
    let mut names: Vec<String> = RECORD_COLUMNS.iter().map(|s| s.to_string()).collect();
    for channel in channels {
        for column in CHANNEL_COLUMNS {
            names.push(format!("{}_{column}", channel.prefix()));
        }
    }
    names
}

/// The result for one frame of a session.
#[derive(Clone, Debug, PartialEq)]
pub struct PhotometryRecord {
    /// Position of the frame in the session input.
    pub image_index: usize,
    pub x_position: f64,
    pub y_position: f64,
    /// False when the center was carried over from an earlier frame.
    pub tracked_position: bool,
    pub movement_pixels: f64,
    pub aperture_area: usize,
    pub sky_annulus_area: usize,
    pub measurements: Vec<FluxMeasurement>,
    pub status: RecordStatus,
    pub error: Option<String>,
    pub exposure_s: Option<f64>,
    pub filter: Option<String>,
    pub date_obs: Option<String>,
    /// Julian date of the capture, when the frame carries a timestamp.
    pub julian_date: Option<f64>,
    /// Aperture pixels the frame marks as unreliable.
    pub flagged_pixels: usize,
}

impl PhotometryRecord {
    /// A failed record at `center`, stamped with the frame's metadata.
    fn blank(image_index: usize, center: PixelPos, movement: f64, frame: &PixelFrame) -> Self {
        let meta = &frame.metadata;
        Self {
            image_index,
            x_position: center.x,
            y_position: center.y,
            tracked_position: false,
            movement_pixels: movement,
            aperture_area: 0,
            sky_annulus_area: 0,
            measurements: Vec::new(),
            status: RecordStatus::Failed,
            error: None,
            exposure_s: meta.exposure_s,
            filter: meta.filter.clone(),
            date_obs: meta.date_obs.clone(),
            julian_date: meta.timestamp_us.map(julian_date),
            flagged_pixels: 0,
        }
    }

    pub fn center(&self) -> PixelPos {
        PixelPos::new(self.x_position, self.y_position)
    }

    pub fn measurement(&self, channel: Channel) -> Option<&FluxMeasurement> {
        self.measurements.iter().find(|m| m.channel == channel)
    }

    /// Ordered flat mapping over the channels this record measured.
    pub fn fields(&self) -> Vec<(String, FieldValue)> {
        let channels: Vec<Channel> = self.measurements.iter().map(|m| m.channel).collect();
        self.fields_for(&channels)
    }

    /// Ordered flat mapping aligned with [`column_names`]`(channels)`.
    /// Channels without a measurement produce empty values.
    pub fn fields_for(&self, channels: &[Channel]) -> Vec<(String, FieldValue)> {
        let text = |v: &Option<String>| v.clone().map(FieldValue::Text).unwrap_or(FieldValue::Empty);
        let float = |v: Option<f64>| v.map(FieldValue::Float).unwrap_or(FieldValue::Empty);
        let base = [
            FieldValue::Int(self.image_index),
            FieldValue::Float(self.x_position),
            FieldValue::Float(self.y_position),
            FieldValue::Bool(self.tracked_position),
            FieldValue::Float(self.movement_pixels),
            FieldValue::Int(self.aperture_area),
            FieldValue::Int(self.sky_annulus_area),
            FieldValue::Text(self.status.to_string()),
            text(&self.error),
            float(self.exposure_s),
            text(&self.filter),
            text(&self.date_obs),
            float(self.julian_date),
            FieldValue::Int(self.flagged_pixels),
        ];

        let mut values: Vec<FieldValue> = base.into_iter().collect();
        for &channel in channels {
            match self.measurement(channel) {
                Some(m) => values.extend([
                    FieldValue::Float(m.raw_flux),
                    FieldValue::Float(m.corrected_flux),
                    FieldValue::Float(m.sky_background_total),
                    FieldValue::Float(m.sky.median),
                    FieldValue::Float(m.sky.sigma),
                    FieldValue::Float(m.poisson_noise),
                    FieldValue::Float(m.total_noise),
                    float(m.snr),
                    float(m.instrumental_magnitude()),
                    float(m.magnitude_error()),
                ]),
                None => values.extend(CHANNEL_COLUMNS.iter().map(|_| FieldValue::Empty)),
            }
        }

        column_names(channels).into_iter().zip(values).collect()
    }
}

/// A running session: one tracker state, one measurer, one frame at a time.
pub struct PhotometrySession {
    provider: Box<dyn CenterProvider>,
    measurer: PhotometryMeasurer,
    radii: ApertureRadii,
    state: TrackState,
}

impl PhotometrySession {
    /// Validate `config` and seed the tracker.
    pub fn new(seed: PixelPos, mode: TrackingMode, config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        if !seed.is_finite() {
            return Err(PhotometryError::InvalidAperture(format!(
                "seed center {seed} is not finite"
            )));
        }

        let provider: Box<dyn CenterProvider> = match mode {
            TrackingMode::Automatic => Box::new(CentroidTracker::new(config.tracking.clone())),
            TrackingMode::Manual(positions) => Box::new(ManualTracker::new(positions)),
        };

        Ok(Self {
            provider,
            measurer: PhotometryMeasurer::new(config.sky_clip),
            radii: config.aperture,
            state: TrackState::seeded(seed),
        })
    }

    pub fn state(&self) -> &TrackState {
        &self.state
    }

    /// Restart tracking from `center` on the next frame.
    pub fn reseed(&mut self, center: PixelPos) {
        let state = std::mem::take(&mut self.state);
        self.state = state.reseed(center);
        info!(frame = self.state.frame_index, %center, "Track re-seeded");
    }

    /// Locate the target on `frame` and measure it.
    pub fn process_frame(&mut self, frame: &PixelFrame) -> PhotometryRecord {
        let image_index = self.state.frame_index;

        let decision = match self.provider.locate(&self.state, frame) {
            Ok((next, decision)) => {
                self.state = next;
                decision
            }
            Err(e) => {
                warn!(frame = image_index, error = %e, "No center for frame");
                let state = std::mem::take(&mut self.state);
                self.state = state.skip_frame();
                let fallback = self
                    .state
                    .last_valid_center
                    .unwrap_or(PixelPos::new(f64::NAN, f64::NAN));
                return failed_record(image_index, fallback, 0.0, frame, &e);
            }
        };

        let CenterDecision {
            center,
            movement,
            outcome,
        } = decision;
        let tracked = outcome.is_tracked();

        let (status, note) = match outcome {
            CenterOutcome::Lost { failures } => {
                let e = PhotometryError::TrackLost { failures };
                let mut record = failed_record(image_index, center, movement, frame, &e);
                record.status = RecordStatus::Lost;
                return record;
            }
            CenterOutcome::Stale { reason } => (RecordStatus::Stale, Some(reason)),
            _ => (RecordStatus::Ok, None),
        };

        let measured = self
            .radii
            .at(center)
            .and_then(|spec| self.measurer.measure(frame, &spec));
        match measured {
            Ok(measurements) => {
                let (aperture_area, sky_annulus_area, flagged_pixels) = measurements
                    .first()
                    .map(|m| (m.aperture_area, m.sky_annulus_area, m.flagged_pixels))
                    .unwrap_or((0, 0, 0));
                debug!(
                    frame = image_index,
                    %center,
                    movement,
                    tracked,
                    channels = measurements.len(),
                    "Frame measured"
                );
                if flagged_pixels > 0 {
                    warn!(frame = image_index, flagged_pixels, "Aperture covers bad pixels");
                }
                PhotometryRecord {
                    tracked_position: tracked,
                    aperture_area,
                    sky_annulus_area,
                    measurements,
                    status,
                    error: note,
                    flagged_pixels,
                    ..PhotometryRecord::blank(image_index, center, movement, frame)
                }
            }
            Err(e) => {
                warn!(frame = image_index, error = %e, "Measurement failed");
                let mut record = failed_record(image_index, center, movement, frame, &e);
                record.tracked_position = tracked;
                record
            }
        }
    }
}

fn failed_record(
    image_index: usize,
    center: PixelPos,
    movement: f64,
    frame: &PixelFrame,
    error: &PhotometryError,
) -> PhotometryRecord {
    PhotometryRecord {
        error: Some(error.to_string()),
        ..PhotometryRecord::blank(image_index, center, movement, frame)
    }
}

/// Records produced by [`run_session`].
#[derive(Clone, Debug, PartialEq)]
pub struct SessionOutput {
    /// One record per processed frame, in input order.
    pub records: Vec<PhotometryRecord>,
    /// The run stopped early on request; `records` covers the frames
    /// processed before that.
    pub cancelled: bool,
}

/// Track and measure the target through `frames`, starting from `seed`.
///
/// Configuration errors are returned before any frame is processed;
/// per-frame problems end up on the frame's record.
pub fn run_session(
    frames: &[PixelFrame],
    seed: PixelPos,
    mode: TrackingMode,
    config: &SessionConfig,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
) -> Result<SessionOutput> {
    let first = frames.first().ok_or(PhotometryError::EmptySequence)?;
    let (w, h) = (first.width() as f64, first.height() as f64);
    if seed.x < 0.0 || seed.y < 0.0 || seed.x > w - 1.0 || seed.y > h - 1.0 {
        return Err(PhotometryError::InvalidParameter(format!(
            "seed {seed} lies outside the {w}x{h} frame"
        )));
    }

    let mut session = PhotometrySession::new(seed, mode, config)?;
    info!(
        frames = frames.len(),
        %seed,
        source_radius = config.aperture.source,
        "Starting photometry session"
    );

    reporter.begin_stage(ProcessingStage::Photometry, Some(frames.len()));
    let mut records = Vec::with_capacity(frames.len());
    let mut cancelled = false;
    for (i, frame) in frames.iter().enumerate() {
        if cancel.is_cancelled() {
            info!(processed = i, "Session cancelled");
            cancelled = true;
            break;
        }
        records.push(session.process_frame(frame));
        reporter.advance(i + 1);
    }
    reporter.finish_stage();

    let tracked = records.iter().filter(|r| r.tracked_position).count();
    info!(records = records.len(), tracked, cancelled, "Session finished");

    Ok(SessionOutput { records, cancelled })
}
