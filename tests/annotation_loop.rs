use anyhow::Result;
use facecam::annotate::{AnnotationLoop, Command, Status};
use facecam::overlay::{DrawOp, BOX_COLOR};
use facecam::snapshot::{SnapshotError, SnapshotExporter, SNAPSHOT_NAME};
use facecam_vision::{BoundingBox, Detection, Expressions, FaceAnalyzer, FrameSource, Gender};
use image::{Rgb, RgbImage};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

struct Frames {
    size: (u32, u32),
}

impl Frames {
    fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
        }
    }
}

impl FrameSource for Frames {
    fn dimensions(&self) -> (u32, u32) {
        self.size
    }

    fn frame(&mut self) -> Result<RgbImage> {
        Ok(RgbImage::from_fn(self.size.0, self.size.1, |x, y| {
            Rgb([x as u8, y as u8, 42])
        }))
    }
}

/// Replays scripted results, then keeps returning the last one.
struct Scripted {
    results: VecDeque<Result<Vec<Detection>>>,
    last: Vec<Detection>,
}

impl Scripted {
    fn new(results: Vec<Result<Vec<Detection>>>) -> Self {
        Self {
            results: results.into(),
            last: vec![],
        }
    }
}

impl FaceAnalyzer for Scripted {
    fn analyze(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        match self.results.pop_front() {
            Some(Ok(d)) => {
                self.last = d.clone();
                Ok(d)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.clone()),
        }
    }
}

/// Records when each analysis started and takes `busy` to finish.
struct Timed {
    busy: Duration,
    starts: Arc<Mutex<Vec<Instant>>>,
}

impl Timed {
    fn new(busy: Duration) -> (Self, Arc<Mutex<Vec<Instant>>>) {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let analyzer = Self {
            busy,
            starts: Arc::clone(&starts),
        };
        (analyzer, starts)
    }
}

impl FaceAnalyzer for Timed {
    fn analyze(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        self.starts.lock().unwrap().push(Instant::now());
        thread::sleep(self.busy);
        Ok(vec![])
    }
}

fn gaps(starts: &[Instant]) -> Vec<Duration> {
    starts.windows(2).map(|w| w[1] - w[0]).collect()
}

fn face(x: f32, y: f32, w: f32, h: f32, age: f32, gender: Gender) -> Detection {
    let expressions: Expressions = [("happy", 0.9), ("neutral", 0.1)].into_iter().collect();
    Detection {
        bbox: BoundingBox::new(x, y, w, h),
        score: 0.9,
        landmarks: vec![],
        expressions,
        age,
        gender,
    }
}

#[test]
fn test_single_face_scenario() -> Result<()> {
    let analyzer = Scripted::new(vec![Ok(vec![face(
        10.0,
        10.0,
        50.0,
        60.0,
        29.6,
        Gender::Male,
    )])]);
    let mut annotator =
        AnnotationLoop::new(Frames::new(200, 200), analyzer, (200, 200), Duration::ZERO);
    annotator.tick()?;

    let ops = annotator.overlay().ops();
    assert_eq!(ops.len(), 2);
    assert_eq!(
        ops[0],
        DrawOp::StrokeRect {
            rect: BoundingBox::new(10.0, 10.0, 50.0, 60.0),
            color: BOX_COLOR,
            line_width: 2,
        }
    );
    let labels: Vec<_> = annotator.overlay().labels().collect();
    assert_eq!(labels, vec!["Age: 30, Gender: male, Mood: happy"]);
    assert_eq!(annotator.status(), Status::Faces(1));
    assert_eq!(annotator.status().to_string(), "Status: 1 face(s) detected ✅");
    Ok(())
}

#[test]
fn test_status_counts_faces() -> Result<()> {
    let three = vec![
        face(0.0, 0.0, 10.0, 10.0, 20.0, Gender::Male),
        face(20.0, 0.0, 10.0, 10.0, 30.0, Gender::Female),
        face(40.0, 0.0, 10.0, 10.0, 40.0, Gender::Male),
    ];
    let analyzer = Scripted::new(vec![Ok(vec![]), Ok(three)]);
    let mut annotator =
        AnnotationLoop::new(Frames::new(64, 64), analyzer, (64, 64), Duration::ZERO);
    assert_eq!(annotator.status(), Status::ModelsLoaded);

    annotator.tick()?;
    assert_eq!(annotator.status().to_string(), "Status: No face detected ❌");
    assert!(annotator.overlay().ops().is_empty());

    annotator.tick()?;
    assert_eq!(annotator.status(), Status::Faces(3));
    assert_eq!(annotator.overlay().labels().count(), 3);
    Ok(())
}

#[test]
fn test_boxes_are_rescaled_to_display() -> Result<()> {
    let analyzer = Scripted::new(vec![Ok(vec![face(
        100.0,
        50.0,
        40.0,
        80.0,
        33.0,
        Gender::Female,
    )])]);
    let mut annotator =
        AnnotationLoop::new(Frames::new(400, 200), analyzer, (200, 400), Duration::ZERO);
    annotator.tick()?;

    match &annotator.overlay().ops()[0] {
        DrawOp::StrokeRect { rect, .. } => {
            assert_eq!(*rect, BoundingBox::new(50.0, 100.0, 20.0, 160.0))
        }
        other => panic!("expected rectangle, got {:?}", other),
    }
    // the shared list keeps frame coordinates
    let dets = annotator.reader().detections();
    assert_eq!(dets[0].bbox, BoundingBox::new(100.0, 50.0, 40.0, 80.0));
    Ok(())
}

#[test]
fn test_list_is_replaced_not_merged() -> Result<()> {
    let analyzer = Scripted::new(vec![
        Ok(vec![
            face(0.0, 0.0, 10.0, 10.0, 20.0, Gender::Male),
            face(20.0, 0.0, 10.0, 10.0, 30.0, Gender::Male),
        ]),
        Ok(vec![face(5.0, 5.0, 10.0, 10.0, 50.0, Gender::Female)]),
    ]);
    let mut annotator =
        AnnotationLoop::new(Frames::new(64, 64), analyzer, (64, 64), Duration::ZERO);
    let reader = annotator.reader();

    annotator.tick()?;
    assert_eq!(reader.detections().len(), 2);
    annotator.tick()?;
    let dets = reader.detections();
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].gender, Gender::Female);
    Ok(())
}

#[test]
fn test_failed_analysis_keeps_previous_results() -> Result<()> {
    let analyzer = Scripted::new(vec![
        Ok(vec![face(0.0, 0.0, 10.0, 10.0, 20.0, Gender::Male)]),
        Err(anyhow::anyhow!("model exploded")),
    ]);
    let mut annotator =
        AnnotationLoop::new(Frames::new(64, 64), analyzer, (64, 64), Duration::ZERO);

    annotator.tick()?;
    annotator.tick()?;
    assert_eq!(annotator.ticks(), 2);
    assert_eq!(annotator.reader().detections().len(), 1);
    assert_eq!(annotator.status(), Status::Faces(1));
    Ok(())
}

#[test]
fn test_save_with_no_face_alerts_and_writes_nothing() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let exporter = SnapshotExporter::new(dir.path());

    let mut annotator = AnnotationLoop::new(
        Frames::new(64, 64),
        Scripted::new(vec![]),
        (64, 64),
        Duration::ZERO,
    );
    // nothing published yet
    assert!(matches!(
        exporter.save(&annotator.reader()),
        Err(SnapshotError::NoFaceAvailable)
    ));

    annotator.tick()?;
    assert!(matches!(
        exporter.save(&annotator.reader()),
        Err(SnapshotError::NoFaceAvailable)
    ));
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn test_save_crops_first_face_from_source_frame() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let exporter = SnapshotExporter::new(dir.path());
    let analyzer = Scripted::new(vec![Ok(vec![
        face(10.0, 20.0, 30.0, 40.0, 25.0, Gender::Female),
        face(60.0, 60.0, 5.0, 5.0, 70.0, Gender::Male),
    ])]);
    // display is half size; the snapshot must still use frame pixels
    let mut annotator =
        AnnotationLoop::new(Frames::new(100, 100), analyzer, (50, 50), Duration::ZERO);
    annotator.tick()?;

    let path = exporter.save(&annotator.reader())?;
    assert_eq!(path, dir.path().join(SNAPSHOT_NAME));
    let saved = image::open(&path)?.to_rgba8();
    assert_eq!(saved.dimensions(), (30, 40));
    assert_eq!(saved.get_pixel(0, 0).0, [10, 20, 42, 255]);

    let second = exporter.save(&annotator.reader())?;
    assert_eq!(second, dir.path().join("captured-face (1).png"));
    Ok(())
}

#[test]
fn test_run_stops_after_tick_limit() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let (_tx, rx) = crossbeam_channel::unbounded::<Command>();
    let mut annotator = AnnotationLoop::new(
        Frames::new(32, 32),
        Scripted::new(vec![]),
        (32, 32),
        Duration::from_millis(1),
    );
    annotator.run(&rx, &SnapshotExporter::new(dir.path()), Some(3))?;
    assert_eq!(annotator.ticks(), 3);
    Ok(())
}

#[test]
fn test_run_handles_save_then_quit_between_ticks() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let (tx, rx) = crossbeam_channel::unbounded();
    tx.send(Command::Save)?;
    tx.send(Command::Quit)?;

    let analyzer = Scripted::new(vec![Ok(vec![face(
        2.0,
        2.0,
        8.0,
        8.0,
        40.0,
        Gender::Male,
    )])]);
    let mut annotator = AnnotationLoop::new(
        Frames::new(32, 32),
        analyzer,
        (32, 32),
        Duration::from_secs(5),
    );
    annotator.run(&rx, &SnapshotExporter::new(dir.path()), None)?;

    assert_eq!(annotator.ticks(), 1);
    assert!(dir.path().join(SNAPSHOT_NAME).exists());
    Ok(())
}

#[test]
fn test_run_keeps_polling_after_commands_close() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let (tx, rx) = crossbeam_channel::unbounded::<Command>();
    drop(tx);
    let mut annotator = AnnotationLoop::new(
        Frames::new(16, 16),
        Scripted::new(vec![]),
        (16, 16),
        Duration::from_millis(1),
    );
    annotator.run(&rx, &SnapshotExporter::new(dir.path()), Some(4))?;
    assert_eq!(annotator.ticks(), 4);
    Ok(())
}

#[test]
fn test_preview_is_written_each_tick() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let preview = dir.path().join("preview.png");
    let analyzer = Scripted::new(vec![Ok(vec![face(
        4.0,
        4.0,
        20.0,
        20.0,
        40.0,
        Gender::Male,
    )])]);
    let mut annotator =
        AnnotationLoop::new(Frames::new(64, 64), analyzer, (32, 32), Duration::ZERO)
            .with_preview(preview.clone());
    annotator.tick()?;

    let img = image::open(&preview)?.to_rgb8();
    assert_eq!(img.dimensions(), (32, 32));
    // box scaled by 0.5 -> (2, 2, 10, 10); its top-left corner is red
    assert_eq!(img.get_pixel(2, 2), &BOX_COLOR);
    Ok(())
}

#[test]
fn test_run_with_zero_tick_limit_does_nothing() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let (_tx, rx) = crossbeam_channel::unbounded::<Command>();
    let (analyzer, starts) = Timed::new(Duration::ZERO);
    let mut annotator =
        AnnotationLoop::new(Frames::new(16, 16), analyzer, (16, 16), Duration::from_millis(1));
    annotator.run(&rx, &SnapshotExporter::new(dir.path()), Some(0))?;
    assert_eq!(annotator.ticks(), 0);
    assert!(starts.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn test_ticks_are_spaced_by_interval_from_start() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let (_tx, rx) = crossbeam_channel::unbounded::<Command>();
    let interval = Duration::from_millis(50);
    // a tick busy for 20ms must not push the next start to 70ms
    let (analyzer, starts) = Timed::new(Duration::from_millis(20));
    let mut annotator = AnnotationLoop::new(Frames::new(16, 16), analyzer, (16, 16), interval);

    let began = Instant::now();
    annotator.run(&rx, &SnapshotExporter::new(dir.path()), Some(4))?;
    let elapsed = began.elapsed();

    assert_eq!(annotator.ticks(), 4);
    // three waits between four ticks, none after the last one
    assert!(elapsed >= interval * 3, "elapsed {:?}", elapsed);
    assert!(elapsed < interval * 4 + Duration::from_millis(30), "elapsed {:?}", elapsed);
    for gap in gaps(&starts.lock().unwrap()) {
        assert!(gap >= interval, "gap {:?}", gap);
        assert!(gap < interval + Duration::from_millis(25), "gap {:?}", gap);
    }
    Ok(())
}

#[test]
fn test_overrunning_tick_is_followed_immediately() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let (_tx, rx) = crossbeam_channel::unbounded::<Command>();
    let interval = Duration::from_millis(100);
    let busy = Duration::from_millis(200);
    let (analyzer, starts) = Timed::new(busy);
    let mut annotator = AnnotationLoop::new(Frames::new(16, 16), analyzer, (16, 16), interval);

    annotator.run(&rx, &SnapshotExporter::new(dir.path()), Some(3))?;

    assert_eq!(annotator.ticks(), 3);
    // waiting a full interval after the overrun would make this busy + interval
    for gap in gaps(&starts.lock().unwrap()) {
        assert!(gap >= busy, "gap {:?}", gap);
        assert!(gap < busy + interval * 4 / 5, "gap {:?}", gap);
    }
    Ok(())
}
