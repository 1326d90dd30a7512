use crate::face::{BoundingBox, Point};
use crate::yunet;
use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Tensor};

/// A located face before classification, in frame pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRegion {
    pub bbox: BoundingBox,
    pub score: f32,
    pub landmarks: Vec<Point>,
}

/// Square, aspect-preserving fit of a frame into the network input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub size: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, size: u32) -> Self {
        let scale = size as f32 / width.max(height).max(1) as f32;
        let new_w = ((width as f32 * scale) as u32).min(size);
        let new_h = ((height as f32 * scale) as u32).min(size);
        Self {
            scale,
            offset_x: (size - new_w) / 2,
            offset_y: (size - new_h) / 2,
            size,
        }
    }

    pub fn apply(&self, img: &RgbImage) -> RgbImage {
        let new_w = ((img.width() as f32 * self.scale) as u32).clamp(1, self.size);
        let new_h = ((img.height() as f32 * self.scale) as u32).clamp(1, self.size);
        let resized = imageops::resize(img, new_w, new_h, imageops::FilterType::Triangle);
        let mut canvas = RgbImage::new(self.size, self.size);
        imageops::overlay(
            &mut canvas,
            &resized,
            self.offset_x as i64,
            self.offset_y as i64,
        );
        canvas
    }

    /// Map a point in network-input pixels back to frame pixels.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}

/// YuNet face detector.
pub struct FaceDetector {
    session: Session,
    score_threshold: f32,
    nms_threshold: f32,
}

impl FaceDetector {
    pub fn new(session: Session, score_threshold: f32, nms_threshold: f32) -> Self {
        Self {
            session,
            score_threshold,
            nms_threshold,
        }
    }

    /// Faces in `img`, highest score first.
    pub fn detect(&mut self, img: &RgbImage) -> Result<Vec<FaceRegion>> {
        let size = yunet::INPUT_SIZE as u32;
        let letterbox = Letterbox::fit(img.width(), img.height(), size);
        let canvas = letterbox.apply(img);

        // planar BGR, values 0..255
        let input = Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, c, y, x)| canvas.get_pixel(x as u32, y as u32)[2 - c] as f32,
        );
        let input = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .context("running detector")?;

        let mut raw: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
        for (_name, output) in outputs.iter() {
            let (shape, data) = output.try_extract_tensor::<f32>()?;
            raw.push((shape.iter().copied().collect(), data.to_vec()));
        }
        let refs: Vec<(&[i64], &[f32])> = raw
            .iter()
            .map(|(s, d)| (s.as_slice(), d.as_slice()))
            .collect();

        let heads = yunet::parse_outputs(&refs, yunet::INPUT_SIZE)?;
        let candidates = yunet::decode(&heads, self.score_threshold, yunet::INPUT_SIZE)?;

        let faces: Vec<FaceRegion> = candidates
            .into_iter()
            .map(|c| {
                let (x, y) = letterbox.unmap(c.bbox[0], c.bbox[1]);
                let landmarks = c
                    .landmarks
                    .chunks_exact(2)
                    .map(|p| {
                        let (x, y) = letterbox.unmap(p[0], p[1]);
                        Point { x, y }
                    })
                    .collect();
                FaceRegion {
                    bbox: BoundingBox::new(
                        x,
                        y,
                        c.bbox[2] / letterbox.scale,
                        c.bbox[3] / letterbox.scale,
                    ),
                    score: c.score,
                    landmarks,
                }
            })
            .collect();

        log::debug!("detector: {} candidates", faces.len());
        Ok(nms(faces, self.nms_threshold))
    }
}

/// Greedy non-maximum suppression; output is sorted by descending score.
pub fn nms(mut faces: Vec<FaceRegion>, iou_threshold: f32) -> Vec<FaceRegion> {
    faces.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<FaceRegion> = Vec::with_capacity(faces.len());
    for face in faces {
        if keep.iter().all(|k| k.bbox.iou(&face.bbox) <= iou_threshold) {
            keep.push(face);
        }
    }
    keep
}
