use anyhow::{Context, Result};
use image::RgbImage;
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Why the camera could not be opened. Both variants are fatal.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("permission denied for camera {device}")]
    PermissionDenied {
        device: String,
        #[source]
        source: io::Error,
    },
    #[error("camera {device} unavailable")]
    DeviceUnavailable {
        device: String,
        #[source]
        source: io::Error,
    },
}

impl CaptureError {
    fn from_io(device: &str, source: io::Error) -> Self {
        let device = device.to_string();
        match source.kind() {
            io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied { device, source },
            _ => CaptureError::DeviceUnavailable { device, source },
        }
    }
}

/// A continuously updating source of RGB frames.
pub trait FrameSource {
    /// Intrinsic frame size, `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    /// The frame for the current instant.
    fn frame(&mut self) -> Result<RgbImage>;
}

/// V4L2 camera.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self, CaptureError> {
        let err = |e| CaptureError::from_io(device, e);

        let dev = Device::with_path(device).map_err(err)?;
        let mut fmt = dev.format().map_err(err)?;
        // Prefer RGB, fallback to YUYV, else accept existing format
        let desired = Format::new(fmt.width, fmt.height, FourCC::new(b"RGB3"));
        fmt = dev.set_format(&desired).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(b"RGB3") {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(b"YUYV"));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).map_err(err)?;
        log::info!(
            "camera {}: {}x{} {}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }
}

impl FrameSource for Camera {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::trace!(
            "captured frame: seq={} len={}",
            meta.sequence,
            data.len()
        );
        let mut buf = match self.fourcc {
            f if f == FourCC::new(b"RGB3") => data.to_vec(),
            f if f == FourCC::new(b"YUYV") => yuyv_to_rgb(self.width, self.height, data)?,
            f if f == FourCC::new(b"GREY") => grey_to_rgb(self.width, self.height, data)?,
            other => anyhow::bail!("unsupported pixel format {}", other),
        };
        let expected = (self.width * self.height * 3) as usize;
        if buf.len() < expected {
            anyhow::bail!("short frame: got {} bytes, expected {}", buf.len(), expected);
        }
        buf.truncate(expected);
        RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
    }
}

/// A single still image served as every frame.
pub struct StillImage {
    image: RgbImage,
}

impl StillImage {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("reading image {}", path.display()))?
            .to_rgb8();
        Ok(Self::new(image))
    }
}

impl FrameSource for StillImage {
    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn frame(&mut self) -> Result<RgbImage> {
        Ok(self.image.clone())
    }
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        anyhow::bail!("short YUYV buffer");
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer");
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}
