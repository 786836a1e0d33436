use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{anyhow, bail, Context, Result};
use csv::Trim;
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};
use lightcurve_core::frame::{Channel, FrameMetadata, PixelFrame, PixelPos};
use lightcurve_core::session::{column_names, PhotometryRecord};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

const IMAGE_EXTENSIONS: [&str; 5] = ["tif", "tiff", "png", "jpg", "jpeg"];

/// Image files in `dir`, sorted by file name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_image {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Load an image file as a frame in ADU. 8-bit files are widened to the
/// 16-bit range; color files become 3-channel frames.
pub fn load_frame(path: &Path, frame_index: usize) -> Result<PixelFrame> {
    let img = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let (w, h) = (img.width() as usize, img.height() as usize);

    let data = if img.color().has_color() {
        let rgb = img.to_rgb16();
        Array3::from_shape_fn((3, h, w), |(ch, row, col)| {
            rgb.get_pixel(col as u32, row as u32).0[ch] as f32
        })
    } else {
        let gray = img.to_luma16();
        Array3::from_shape_fn((1, h, w), |(_, row, col)| {
            gray.get_pixel(col as u32, row as u32).0[0] as f32
        })
    };

    let metadata = FrameMetadata {
        frame_index,
        timestamp_us: modified_us(path),
        ..Default::default()
    };
    PixelFrame::new(data, metadata).with_context(|| format!("Invalid frame {}", path.display()))
}

/// File modification time in microseconds since the Unix epoch, used as
/// the capture time when nothing better is known.
fn modified_us(path: &Path) -> Option<u64> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    u64::try_from(since_epoch.as_micros()).ok()
}

/// Load every image in `dir`, in file-name order.
pub fn load_dir(dir: &Path) -> Result<Vec<PixelFrame>> {
    let paths = list_images(dir)?;
    if paths.is_empty() {
        bail!("No image files found in {}", dir.display());
    }
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| load_frame(path, i))
        .collect()
}

fn to_u16(v: f32) -> u16 {
    v.round().clamp(0.0, u16::MAX as f32) as u16
}

fn to_u8(v: f32) -> u8 {
    (v / 257.0).round().clamp(0.0, u8::MAX as f32) as u8
}

fn to_image(frame: &PixelFrame, eight_bit: bool) -> Result<DynamicImage> {
    let (w, h) = (frame.width() as u32, frame.height() as u32);
    let size_err = || anyhow!("buffer size does not match {w}x{h}");

    let img = match (frame.is_color(), eight_bit) {
        (false, false) => {
            let pixels: Vec<u16> = frame.plane(0).iter().map(|&v| to_u16(v)).collect();
            DynamicImage::ImageLuma16(
                ImageBuffer::<Luma<u16>, _>::from_raw(w, h, pixels).ok_or_else(size_err)?,
            )
        }
        (false, true) => {
            let pixels: Vec<u8> = frame.plane(0).iter().map(|&v| to_u8(v)).collect();
            DynamicImage::ImageLuma8(
                ImageBuffer::<Luma<u8>, _>::from_raw(w, h, pixels).ok_or_else(size_err)?,
            )
        }
        (true, false) => {
            let pixels = interleave(frame, to_u16);
            DynamicImage::ImageRgb16(
                ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, pixels).ok_or_else(size_err)?,
            )
        }
        (true, true) => {
            let pixels = interleave(frame, to_u8);
            DynamicImage::ImageRgb8(
                ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, pixels).ok_or_else(size_err)?,
            )
        }
    };
    Ok(img)
}

fn interleave<T>(frame: &PixelFrame, convert: fn(f32) -> T) -> Vec<T> {
    let (c, h, w) = frame.shape();
    let mut pixels = Vec::with_capacity(c * h * w);
    for row in 0..h {
        for col in 0..w {
            for ch in 0..c {
                pixels.push(convert(frame.data[[ch, row, col]]));
            }
        }
    }
    pixels
}

/// Save a frame, choosing format from the file extension: 8-bit PNG for
/// `.png`, 16-bit TIFF otherwise. Values are rounded and clamped to the
/// output range.
pub fn save_frame(frame: &PixelFrame, path: &Path) -> Result<()> {
    let png = matches!(path.extension().and_then(|e| e.to_str()), Some("png"));
    let img = to_image(frame, png)?;
    let format = if png { ImageFormat::Png } else { ImageFormat::Tiff };
    img.save_with_format(path, format)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Positions file row as written by the interactive star picker. Extra
/// columns are ignored.
#[derive(Debug, Deserialize)]
struct PositionRow {
    image_index: usize,
    x_position: f64,
    y_position: f64,
}

/// Read a manual positions file.
///
/// Either a headed CSV with `image_index`, `x_position` and `y_position`
/// columns, where frames without a row become gaps, or one headerless
/// `x,y` pair per frame. Blank lines and `#` comments are ignored.
pub fn read_positions(path: &Path) -> Result<Vec<PixelPos>> {
    let file = File::open(path).with_context(|| format!("Failed to read positions {}", path.display()))?;
    parse_positions(file).with_context(|| format!("Invalid positions file {}", path.display()))
}

fn parse_positions<R: Read>(input: R) -> Result<Vec<PixelPos>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .flexible(true)
        .from_reader(input);

    let mut records = reader.records();
    let Some(first) = records.next().transpose()? else {
        return Ok(Vec::new());
    };

    if !first.iter().any(|field| field == "image_index") {
        let mut positions = Vec::new();
        for record in std::iter::once(Ok(first)).chain(records) {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            if record.len() != 2 {
                bail!("line {line}: expected `x,y`");
            }
            let (x, y): (f64, f64) = record
                .deserialize(None)
                .with_context(|| format!("line {line}: bad coordinates"))?;
            positions.push(PixelPos::new(x, y));
        }
        return Ok(positions);
    }

    let header = first;
    let mut positions: Vec<PixelPos> = Vec::new();
    for record in records {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let row: PositionRow = record
            .deserialize(Some(&header))
            .with_context(|| format!("line {line}: bad position row"))?;
        if row.image_index >= positions.len() {
            positions.resize(row.image_index + 1, PixelPos::new(f64::NAN, f64::NAN));
        }
        positions[row.image_index] = PixelPos::new(row.x_position, row.y_position);
    }
    let gaps = positions.iter().filter(|p| !p.is_finite()).count();
    if gaps > 0 {
        tracing::warn!(gaps, "Positions file skips frames; they will be flagged");
    }
    Ok(positions)
}

/// File written next to calibrated frames listing pixels divided by a
/// clamped flat value.
pub const BAD_PIXELS_FILE: &str = "bad_pixels.csv";

#[derive(Debug, Serialize, Deserialize)]
struct BadPixelRow {
    row: usize,
    col: usize,
}

pub fn write_bad_pixels(path: &Path, pixels: &[(usize, usize)]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
    for &(row, col) in pixels {
        writer.serialize(BadPixelRow { row, col })?;
    }
    writer.flush()?;
    Ok(())
}

/// Bad pixels listed in `dir`, sorted. Empty when the directory has no list.
pub fn read_bad_pixels(dir: &Path) -> Result<Vec<(usize, usize)>> {
    let path = dir.join(BAD_PIXELS_FILE);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut pixels = reader
        .deserialize()
        .map(|row| row.map(|r: BadPixelRow| (r.row, r.col)))
        .collect::<std::result::Result<Vec<_>, csv::Error>>()
        .with_context(|| format!("Invalid bad pixel list {}", path.display()))?;
    pixels.sort_unstable();
    pixels.dedup();
    Ok(pixels)
}

/// Write records as CSV with a header row. Every row has the same columns;
/// channels missing from a record are left empty.
pub fn write_csv(path: &Path, records: &[PhotometryRecord], channels: &[Channel]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(column_names(channels))?;
    for record in records {
        writer.write_record(
            record
                .fields_for(channels)
                .into_iter()
                .map(|(_, value)| value.to_string()),
        )?;
    }
    writer.flush()?;
    Ok(())
}
