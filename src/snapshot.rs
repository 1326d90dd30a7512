use facecam_vision::BoundingBox;
use image::{ImageEncoder, Rgba, RgbaImage, RgbImage};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::annotate::DetectionsReader;

pub const SNAPSHOT_NAME: &str = "captured-face.png";

/// A crop may extend past the frame, but never beyond this many frame sizes.
const MAX_CROP_FACTOR: f32 = 2.0;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("No face to save!")]
    NoFaceAvailable,
    #[error("face box {0:?} is smaller than one pixel")]
    EmptyRegion(BoundingBox),
    #[error("face box {0:?} is not finite or far larger than the frame")]
    InvalidRegion(BoundingBox),
    #[error("encoding snapshot: {0}")]
    Encode(#[from] image::ImageError),
    #[error("writing snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Saves the first current face as a PNG in a fixed directory.
#[derive(Debug, Clone)]
pub struct SnapshotExporter {
    dir: PathBuf,
    file_name: String,
}

impl SnapshotExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_name: SNAPSHOT_NAME.to_string(),
        }
    }

    /// Crop the first detection out of the frame it was found in and write it.
    pub fn save(&self, reader: &DetectionsReader) -> Result<PathBuf, SnapshotError> {
        let (frame, detections) = reader.current().ok_or(SnapshotError::NoFaceAvailable)?;
        let first = detections.first().ok_or(SnapshotError::NoFaceAvailable)?;

        let crop = crop_region(&frame, &first.bbox)?;
        let png = encode_png(&crop)?;

        fs::create_dir_all(&self.dir).map_err(|source| SnapshotError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = unique_path(&self.dir, &self.file_name);
        fs::write(&path, png).map_err(|source| SnapshotError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Copy `bbox` out of `frame` into a buffer exactly the box's size.
///
/// Origin and size are truncated to whole pixels. Parts of the box outside
/// the frame stay transparent.
pub fn crop_region(frame: &RgbImage, bbox: &BoundingBox) -> Result<RgbaImage, SnapshotError> {
    let finite = [bbox.x, bbox.y, bbox.width, bbox.height]
        .iter()
        .all(|v| v.is_finite());
    let (max_w, max_h) = (
        frame.width() as f32 * MAX_CROP_FACTOR,
        frame.height() as f32 * MAX_CROP_FACTOR,
    );
    if !finite || bbox.width > max_w || bbox.height > max_h {
        return Err(SnapshotError::InvalidRegion(*bbox));
    }
    let width = bbox.width.max(0.0) as u32;
    let height = bbox.height.max(0.0) as u32;
    if width == 0 || height == 0 {
        return Err(SnapshotError::EmptyRegion(*bbox));
    }
    let ox = bbox.x.trunc() as i64;
    let oy = bbox.y.trunc() as i64;
    let (fw, fh) = (frame.width() as i64, frame.height() as i64);

    let mut out = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    for y in 0..height {
        let sy = oy + y as i64;
        if sy < 0 || sy >= fh {
            continue;
        }
        for x in 0..width {
            let sx = ox + x as i64;
            if sx < 0 || sx >= fw {
                continue;
            }
            let [r, g, b] = frame.get_pixel(sx as u32, sy as u32).0;
            out.put_pixel(x, y, Rgba([r, g, b, 255]));
        }
    }
    Ok(out)
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, SnapshotError> {
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf).write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        image::ExtendedColorType::Rgba8,
    )?;
    Ok(buf)
}

/// `dir/name`, or `dir/stem (n).ext` with the first free `n`.
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let first = dir.join(name);
    if !first.exists() {
        return first;
    }
    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1u32..)
        .map(|n| dir.join(format!("{} ({}){}", stem, n, ext)))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

/// Encode `img` as PNG at `path` via a temp file and rename.
pub fn write_png_atomic(img: &RgbImage, path: &Path) -> anyhow::Result<()> {
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf).write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    let partial = path.with_extension("part");
    let mut file = fs::File::create(&partial)?;
    file.write_all(&buf)?;
    file.flush()?;
    drop(file);
    fs::rename(&partial, path)?;
    Ok(())
}

/// Blocking user-visible alert for a failed save.
pub fn alert(err: &SnapshotError) {
    log::error!("❌ {}", err);
    eprint!("\x07");
}
