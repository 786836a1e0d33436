use ndarray::{Array2, Array3, ArrayView2, Axis, CowArray, Ix2};
use serde::{Deserialize, Serialize};

use crate::consts::COLOR_CHANNEL_COUNT;
use crate::error::{PhotometryError, Result};

/// A single mono or RGB image frame.
///
/// Pixel values are raw sensor units (ADU) stored as f32. Stages never mutate
/// a frame they were handed; they derive a new one with [`PixelFrame::derive`].
#[derive(Clone, Debug)]
pub struct PixelFrame {
    /// Pixel data, shape = (channels, height, width). `channels` is 1 or 3.
    pub data: Array3<f32>,
    pub metadata: FrameMetadata,
}

impl PixelFrame {
    pub fn new(data: Array3<f32>, metadata: FrameMetadata) -> Result<Self> {
        let (c, h, w) = data.dim();
        if c != 1 && c != COLOR_CHANNEL_COUNT {
            return Err(PhotometryError::InvalidFrame(format!(
                "expected 1 or {COLOR_CHANNEL_COUNT} channels, got {c}"
            )));
        }
        if h == 0 || w == 0 {
            return Err(PhotometryError::InvalidFrame(format!(
                "empty frame {w}x{h}"
            )));
        }
        Ok(Self { data, metadata })
    }

    /// Wrap a single grayscale plane.
    pub fn mono(plane: Array2<f32>) -> Self {
        Self {
            data: plane.insert_axis(Axis(0)),
            metadata: FrameMetadata::default(),
        }
    }

    /// Build an RGB frame from three equally sized planes.
    pub fn rgb(red: Array2<f32>, green: Array2<f32>, blue: Array2<f32>) -> Result<Self> {
        let (h, w) = red.dim();
        for plane in [&green, &blue] {
            if plane.dim() != (h, w) {
                let (ph, pw) = plane.dim();
                return Err(PhotometryError::ShapeMismatch {
                    expected: (1, h, w),
                    actual: (1, ph, pw),
                });
            }
        }
        let data = ndarray::stack(Axis(0), &[red.view(), green.view(), blue.view()])
            .map_err(|e| PhotometryError::InvalidFrame(e.to_string()))?;
        Ok(Self {
            data,
            metadata: FrameMetadata::default(),
        })
    }

    pub fn with_metadata(mut self, metadata: FrameMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn channel_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn is_color(&self) -> bool {
        self.channel_count() == COLOR_CHANNEL_COUNT
    }

    pub fn width(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn height(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    /// `(channels, height, width)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Borrow one stored plane.
    pub fn plane(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), index)
    }

    /// Pixel data for one measurement channel. Gray on a color frame is
    /// derived on the fly; the stored planes are borrowed.
    pub fn channel_data(&self, channel: Channel) -> Result<CowArray<'_, f32, Ix2>> {
        match (channel, self.is_color()) {
            (Channel::Gray, false) => Ok(CowArray::from(self.plane(0))),
            (Channel::Gray, true) => {
                let mean = self.data.mean_axis(Axis(0)).ok_or_else(|| {
                    PhotometryError::InvalidFrame("cannot average empty channel axis".into())
                })?;
                Ok(CowArray::from(mean))
            }
            (_, true) => {
                let index = channel.plane_index().unwrap_or(0);
                Ok(CowArray::from(self.plane(index)))
            }
            (_, false) => Err(PhotometryError::InvalidParameter(format!(
                "channel {channel} requested from a mono frame"
            ))),
        }
    }

    /// Channels measured for this frame: gray only for mono frames,
    /// R, G, B and the derived gray for color frames.
    pub fn channels(&self) -> &'static [Channel] {
        if self.is_color() {
            &Channel::ALL
        } else {
            &[Channel::Gray]
        }
    }

    /// Fail with `ShapeMismatch` unless `other` has the same channel count
    /// and dimensions.
    pub fn ensure_same_shape(&self, other: &PixelFrame) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(PhotometryError::ShapeMismatch {
                expected: self.shape(),
                actual: other.shape(),
            });
        }
        Ok(())
    }

    /// A new frame carrying `data`, this frame's metadata and one more
    /// history entry.
    pub fn derive(&self, data: Array3<f32>, step: impl Into<String>) -> PixelFrame {
        let mut metadata = self.metadata.clone();
        metadata.history.push(step.into());
        PixelFrame { data, metadata }
    }
}

/// A sub-pixel position on the frame grid. Pixel `(row, col)` has its
/// center at `x = col`, `y = row`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelPos {
    pub x: f64,
    pub y: f64,
}

impl PixelPos {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &PixelPos) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl std::fmt::Display for PixelPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

/// Measurement channel selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Red,
    Green,
    Blue,
    Gray,
}

impl Channel {
    /// Every channel measured on a color frame, in output order.
    pub const ALL: [Channel; 4] = [Channel::Red, Channel::Green, Channel::Blue, Channel::Gray];

    /// Column prefix used in flattened records.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Red => "r",
            Self::Green => "g",
            Self::Blue => "b",
            Self::Gray => "gray",
        }
    }

    /// Plane index inside a color frame; `None` for the derived gray channel.
    pub fn plane_index(&self) -> Option<usize> {
        match self {
            Self::Red => Some(0),
            Self::Green => Some(1),
            Self::Blue => Some(2),
            Self::Gray => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Red => write!(f, "Red"),
            Self::Green => write!(f, "Green"),
            Self::Blue => write!(f, "Blue"),
            Self::Gray => write!(f, "Gray"),
        }
    }
}

/// Per-frame metadata handed over by the decoder.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameMetadata {
    pub frame_index: usize,
    /// Exposure time in seconds.
    pub exposure_s: Option<f64>,
    pub filter: Option<String>,
    /// Capture time, microseconds since the Unix epoch.
    pub timestamp_us: Option<u64>,
    /// Raw DATE-OBS string when the decoder supplies one.
    pub date_obs: Option<String>,
    pub object: Option<String>,
    pub observer: Option<String>,
    pub telescope: Option<String>,
    pub instrument: Option<String>,
    /// Processing steps applied so far, oldest first.
    pub history: Vec<String>,
    /// Pixels `(row, col)` whose calibrated values are unreliable, such as
    /// those divided by a clamped flat value. Sorted, no duplicates.
    pub bad_pixels: Vec<(usize, usize)>,
    pub provenance: Provenance,
}

/// Which corrections have already been applied to a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Provenance {
    pub bias_dark_removed: bool,
    pub flat_fielded: bool,
}
