/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum frame count to use frame-level Rayon parallelism.
pub const PARALLEL_FRAME_THRESHOLD: usize = 4;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-10;

/// Number of channels in a color frame (R, G, B).
pub const COLOR_CHANNEL_COUNT: usize = 3;

/// Default sigma threshold for iterative clipping.
pub const DEFAULT_CLIP_SIGMA: f64 = 3.0;

/// Default iteration cap for iterative clipping.
pub const DEFAULT_CLIP_ITERATIONS: usize = 10;

/// Below this many finite samples, clipping is skipped and the plain
/// statistics are returned with the `degenerate` flag set.
pub const MIN_CLIP_SAMPLES: usize = 5;

/// Normalized flat values below this are clamped before division.
pub const DEFAULT_MIN_FLAT_VALUE: f64 = 1e-6;

/// Sigma used when estimating the optimal dark scale factor.
pub const DARK_OPTIMIZE_SIGMA: f64 = 2.5;

/// Iteration cap used when estimating the optimal dark scale factor.
pub const DARK_OPTIMIZE_ITERATIONS: usize = 5;

/// Only dark pixels above this fraction of the dark median take part in
/// the dark scale estimate.
pub const DARK_OPTIMIZE_PIXEL_FRACTION: f64 = 0.5;

/// Allowed range of an optimized dark scale factor.
pub const DARK_SCALE_RANGE: (f64, f64) = (0.1, 5.0);

/// Default half-size (pixels) of the centroid search window.
pub const DEFAULT_SEARCH_RADIUS: f64 = 20.0;

/// Default maximum accepted movement of the target between two frames.
pub const DEFAULT_MAX_MOVEMENT: f64 = 12.0;

/// Default number of consecutive rejected frames tolerated before the
/// track is declared lost.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Default brightness requirement at the refined center, in background sigmas.
pub const DEFAULT_VALIDATION_SIGMA: f64 = 3.0;

/// Default minimum distance (pixels) between an accepted center and the frame border.
pub const DEFAULT_EDGE_MARGIN: f64 = 5.0;

/// Number of accepted positions kept for motion prediction.
pub const TRACK_HISTORY_LEN: usize = 5;

/// Default source aperture radius (pixels).
pub const DEFAULT_SOURCE_RADIUS: f64 = 8.0;

/// Default inner sky annulus radius (pixels).
pub const DEFAULT_INNER_SKY_RADIUS: f64 = 12.0;

/// Default outer sky annulus radius (pixels).
pub const DEFAULT_OUTER_SKY_RADIUS: f64 = 20.0;

/// Julian date of the Unix epoch (1970-01-01T00:00:00 UTC).
pub const UNIX_EPOCH_JD: f64 = 2_440_587.5;

/// Microseconds per day.
pub const MICROS_PER_DAY: f64 = 86_400_000_000.0;
