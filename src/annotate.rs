use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use facecam_vision::{resize_detections, Detection, FaceAnalyzer, FrameSource};
use image::{imageops, RgbImage};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::overlay::Overlay;
use crate::snapshot::{self, SnapshotExporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    ModelsLoaded,
    NoFace,
    Faces(usize),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::ModelsLoaded => write!(f, "Status: Models loaded ✅"),
            Status::NoFace => write!(f, "Status: No face detected ❌"),
            Status::Faces(n) => write!(f, "Status: {} face(s) detected ✅", n),
        }
    }
}

impl Status {
    pub fn for_count(count: usize) -> Self {
        if count == 0 {
            Status::NoFace
        } else {
            Status::Faces(count)
        }
    }
}

#[derive(Debug, Default)]
struct Current {
    frame: Option<Arc<RgbImage>>,
    detections: Arc<Vec<Detection>>,
}

/// The current detection list and the frame it came from.
///
/// Owned by the annotation loop, which is the only writer. Every publish
/// replaces both halves together.
#[derive(Debug, Default)]
pub struct DetectionCell {
    inner: Arc<RwLock<Current>>,
}

impl DetectionCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Arc<RgbImage>, detections: Vec<Detection>) {
        let mut current = self.inner.write().unwrap_or_else(|e| e.into_inner());
        current.frame = Some(frame);
        current.detections = Arc::new(detections);
    }

    pub fn reader(&self) -> DetectionsReader {
        DetectionsReader {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Read-only view of a [`DetectionCell`].
#[derive(Debug, Clone)]
pub struct DetectionsReader {
    inner: Arc<RwLock<Current>>,
}

impl DetectionsReader {
    pub fn detections(&self) -> Arc<Vec<Detection>> {
        let current = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&current.detections)
    }

    /// Frame and list as published together; `None` before the first tick.
    pub fn current(&self) -> Option<(Arc<RgbImage>, Arc<Vec<Detection>>)> {
        let current = self.inner.read().unwrap_or_else(|e| e.into_inner());
        current
            .frame
            .as_ref()
            .map(|f| (Arc::clone(f), Arc::clone(&current.detections)))
    }
}

/// Requests serviced between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Save,
    Quit,
}

/// Polls the analyzer, keeps the overlay and status current.
pub struct AnnotationLoop<S, A> {
    source: S,
    analyzer: A,
    cell: DetectionCell,
    overlay: Overlay,
    status: Status,
    interval: Duration,
    preview_path: Option<PathBuf>,
    ticks: u64,
}

impl<S: FrameSource, A: FaceAnalyzer> AnnotationLoop<S, A> {
    /// Start polling `source` through `analyzer`, drawing on a display of
    /// `display` size.
    pub fn new(source: S, analyzer: A, display: (u32, u32), interval: Duration) -> Self {
        let status = Status::ModelsLoaded;
        log::info!("{}", status);
        Self {
            source,
            analyzer,
            cell: DetectionCell::new(),
            overlay: Overlay::new(display.0, display.1),
            status,
            interval,
            preview_path: None,
            ticks: 0,
        }
    }

    /// Write the rendered display to `path` after every tick.
    pub fn with_preview(mut self, path: PathBuf) -> Self {
        self.preview_path = Some(path);
        self
    }

    pub fn reader(&self) -> DetectionsReader {
        self.cell.reader()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// One poll: capture, analyze, publish, redraw, update status.
    pub fn tick(&mut self) -> Result<()> {
        let frame = Arc::new(self.source.frame().context("reading frame")?);
        self.ticks += 1;

        let detections = match self.analyzer.analyze(&frame) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("tick {}: analysis failed: {:#}", self.ticks, e);
                return Ok(());
            }
        };

        let display = self.overlay.dimensions();
        let resized = resize_detections(&detections, frame.dimensions(), display);
        self.cell.publish(Arc::clone(&frame), detections);

        self.overlay.clear();
        for detection in &resized {
            self.overlay.annotate(detection);
        }
        for label in self.overlay.labels() {
            log::debug!("tick {}: {}", self.ticks, label);
        }

        let status = Status::for_count(resized.len());
        if status != self.status {
            log::info!("{}", status);
        }
        self.status = status;

        if let Some(path) = &self.preview_path {
            let rendered = self.render(&frame);
            snapshot::write_png_atomic(&rendered, path)
                .with_context(|| format!("writing preview {}", path.display()))?;
        }
        Ok(())
    }

    /// The display surface: `frame` scaled to display size with the overlay on top.
    pub fn render(&self, frame: &RgbImage) -> RgbImage {
        let (w, h) = self.overlay.dimensions();
        let mut display = if frame.dimensions() == (w, h) {
            frame.clone()
        } else {
            imageops::resize(frame, w, h, imageops::FilterType::Triangle)
        };
        self.overlay.render_onto(&mut display);
        display
    }

    /// Single-flight polling until `Quit` or `max_ticks`.
    ///
    /// The next tick starts one interval after the previous one started, or
    /// right away if the previous tick overran. Commands are handled while
    /// waiting, never during a tick.
    pub fn run(
        &mut self,
        commands: &Receiver<Command>,
        exporter: &SnapshotExporter,
        max_ticks: Option<u64>,
    ) -> Result<()> {
        let mut commands_open = true;
        loop {
            if max_ticks.is_some_and(|max| self.ticks >= max) {
                return Ok(());
            }
            let started = Instant::now();
            self.tick()?;
            if max_ticks.is_some_and(|max| self.ticks >= max) {
                return Ok(());
            }

            let deadline = started + self.interval;
            loop {
                if !commands_open {
                    let now = Instant::now();
                    if deadline > now {
                        std::thread::sleep(deadline - now);
                    }
                    break;
                }
                match commands.recv_deadline(deadline) {
                    Ok(Command::Save) => match exporter.save(&self.cell.reader()) {
                        Ok(path) => log::info!("Saved face to {}", path.display()),
                        Err(e) => snapshot::alert(&e),
                    },
                    Ok(Command::Quit) => return Ok(()),
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => {
                        log::debug!("command channel closed");
                        commands_open = false;
                    }
                }
            }
        }
    }
}
