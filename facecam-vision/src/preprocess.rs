//! Crops and tensors shared by the per-face classifiers.

use crate::face::BoundingBox;
use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Tensor};

/// Crop `bbox` grown by `margin` (fraction of each side), clamped to the frame.
/// Returns `None` when nothing of the box lies inside the frame.
pub fn crop_face(frame: &RgbImage, bbox: &BoundingBox, margin: f32) -> Option<RgbImage> {
    let dx = bbox.width * margin;
    let dy = bbox.height * margin;
    let x0 = (bbox.x - dx).max(0.0).floor() as u32;
    let y0 = (bbox.y - dy).max(0.0).floor() as u32;
    let x1 = ((bbox.x + bbox.width + dx).min(frame.width() as f32)).ceil() as u32;
    let y1 = ((bbox.y + bbox.height + dy).min(frame.height() as f32)).ceil() as u32;
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image())
}

/// Planar BGR tensor `[1, 3, size, size]` with a per-channel mean subtracted.
pub fn bgr_tensor(face: &RgbImage, size: u32, mean_bgr: [f32; 3]) -> Array4<f32> {
    let resized = imageops::resize(face, size, size, imageops::FilterType::Triangle);
    Array4::from_shape_fn((1, 3, size as usize, size as usize), |(_, c, y, x)| {
        resized.get_pixel(x as u32, y as u32)[2 - c] as f32 - mean_bgr[c]
    })
}

/// Single-channel luma tensor `[1, 1, size, size]`, values 0..255.
pub fn gray_tensor(face: &RgbImage, size: u32) -> Array4<f32> {
    let gray = imageops::grayscale(face);
    let resized = imageops::resize(&gray, size, size, imageops::FilterType::Triangle);
    Array4::from_shape_fn((1, 1, size as usize, size as usize), |(_, _, y, x)| {
        resized.get_pixel(x as u32, y as u32)[0] as f32
    })
}

/// Run a single-input classifier and return its first output flattened.
pub fn run_scores(session: &mut Session, input: Array4<f32>) -> Result<Vec<f32>> {
    let input = Tensor::from_array(input)?;
    let outputs = session
        .run(ort::inputs![input])
        .context("running classifier")?;
    let (_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    Ok(data.to_vec())
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

/// Treat `scores` as probabilities if they already look like a distribution,
/// otherwise softmax them.
pub fn as_probabilities(scores: &[f32]) -> Vec<f32> {
    let sum: f32 = scores.iter().sum();
    let in_range = scores.iter().all(|v| (0.0..=1.0).contains(v));
    if in_range && (sum - 1.0).abs() < 1e-3 {
        scores.to_vec()
    } else {
        softmax(scores)
    }
}
