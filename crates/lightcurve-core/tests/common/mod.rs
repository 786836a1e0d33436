#![allow(dead_code)]

use ndarray::Array2;

use lightcurve_core::frame::{FrameMetadata, PixelFrame, PixelPos};

/// Mono frame with every pixel set to `fill`.
pub fn uniform_frame(h: usize, w: usize, fill: f32) -> PixelFrame {
    PixelFrame::mono(Array2::from_elem((h, w), fill))
}

/// RGB frame with a constant value per channel.
pub fn uniform_rgb(h: usize, w: usize, fill: [f32; 3]) -> PixelFrame {
    PixelFrame::rgb(
        Array2::from_elem((h, w), fill[0]),
        Array2::from_elem((h, w), fill[1]),
        Array2::from_elem((h, w), fill[2]),
    )
    .unwrap()
}

/// Deterministic zero-mean ripple in [-amplitude, amplitude].
pub fn ripple(row: usize, col: usize, amplitude: f32) -> f32 {
    let k = ((row * 7919 + col * 104_729) % 17) as f32;
    (k - 8.0) / 8.0 * amplitude
}

/// Plane with a Gaussian star of total `flux` centred at `center` on a
/// constant `background`.
pub fn star_plane(
    h: usize,
    w: usize,
    background: f32,
    center: PixelPos,
    flux: f64,
    sigma: f64,
) -> Array2<f32> {
    let amplitude = flux / (2.0 * std::f64::consts::PI * sigma * sigma);
    Array2::from_shape_fn((h, w), |(row, col)| {
        let dx = col as f64 - center.x;
        let dy = row as f64 - center.y;
        let v = amplitude * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
        background + v as f32
    })
}

/// Mono frame with a Gaussian star (sigma 1.5 px).
pub fn star_frame(h: usize, w: usize, background: f32, center: PixelPos, flux: f64) -> PixelFrame {
    PixelFrame::mono(star_plane(h, w, background, center, flux, 1.5))
}

/// Mono frame with a disk of constant value on zero background.
/// Returns the frame and the total flux in the disk.
pub fn flat_top_frame(h: usize, w: usize, center: PixelPos, radius: f64, value: f32) -> (PixelFrame, f64) {
    let mut total = 0.0f64;
    let plane = Array2::from_shape_fn((h, w), |(row, col)| {
        let dx = col as f64 - center.x;
        let dy = row as f64 - center.y;
        if dx * dx + dy * dy <= radius * radius {
            total += value as f64;
            value
        } else {
            0.0
        }
    });
    (PixelFrame::mono(plane), total)
}

/// Attach an exposure time and index to a frame.
pub fn with_exposure(frame: PixelFrame, exposure_s: f64, index: usize) -> PixelFrame {
    let metadata = FrameMetadata {
        frame_index: index,
        exposure_s: Some(exposure_s),
        ..frame.metadata.clone()
    };
    frame.with_metadata(metadata)
}

/// Mark a frame as already bias/dark corrected.
pub fn corrected(mut frame: PixelFrame) -> PixelFrame {
    frame.metadata.provenance.bias_dark_removed = true;
    frame
}
