//! YuNet output decoding.
//!
//! The model emits twelve tensors, four heads per stride (8, 16, 32), in the
//! order `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16,
//! bbox_32, kps_8, kps_16, kps_32`. Each head is `[1, H*W, C]` with C = 1, 1,
//! 4 and 10. Decoding is anchor-free:
//!
//! cx = (col + dx) * stride, cy = (row + dy) * stride
//! w = exp(dw) * stride, h = exp(dh) * stride
//! score = sqrt(cls * obj)
//!
//! All coordinates produced here are pixels of the square network input.

use anyhow::Result;
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];
pub const INPUT_SIZE: usize = 640;

/// A face candidate in network-input pixels.
#[derive(Debug, Clone)]
pub struct RawFace {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

/// Per-stride heads, indexed like [`STRIDES`].
pub struct Heads {
    pub scores: Vec<Array2<f32>>,
    pub boxes: Vec<Array2<f32>>,
    pub landmarks: Vec<Array2<f32>>,
}

fn grid_cells(input_size: usize, stride: usize) -> usize {
    (input_size / stride) * (input_size / stride)
}

fn head(
    outputs: &[(&[i64], &[f32])],
    index: usize,
    channels: usize,
    cells: usize,
) -> Result<Array2<f32>> {
    let (shape, data) = outputs
        .get(index)
        .ok_or_else(|| anyhow::anyhow!("missing YuNet output {}", index))?;
    if shape.len() != 3 || shape[0] != 1 || shape[2] != channels as i64 {
        anyhow::bail!(
            "YuNet output {} has shape {:?}, expected [1, {}, {}]",
            index,
            shape,
            cells,
            channels
        );
    }
    if shape[1] as usize != cells {
        anyhow::bail!(
            "YuNet output {} has {} cells, expected {}",
            index,
            shape[1],
            cells
        );
    }
    Ok(Array2::from_shape_vec((cells, channels), data.to_vec())?)
}

/// Split the flat output list into per-stride heads and fold cls/obj into one score.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Heads> {
    let mut heads = Heads {
        scores: Vec::with_capacity(STRIDES.len()),
        boxes: Vec::with_capacity(STRIDES.len()),
        landmarks: Vec::with_capacity(STRIDES.len()),
    };
    let n = STRIDES.len();
    for (i, &stride) in STRIDES.iter().enumerate() {
        let cells = grid_cells(input_size, stride);
        let cls = head(outputs, i, 1, cells)?;
        let obj = head(outputs, n + i, 1, cells)?;
        let score = ndarray::Zip::from(&cls)
            .and(&obj)
            .map_collect(|&c, &o| (c.clamp(0.0, 1.0) * o.clamp(0.0, 1.0)).sqrt());
        heads.scores.push(score);
        heads.boxes.push(head(outputs, 2 * n + i, 4, cells)?);
        heads.landmarks.push(head(outputs, 3 * n + i, 10, cells)?);
    }
    Ok(heads)
}

/// Decode every grid cell whose score reaches `score_threshold`.
pub fn decode(heads: &Heads, score_threshold: f32, input_size: usize) -> Result<Vec<RawFace>> {
    let mut faces = Vec::new();

    for (s, &stride) in STRIDES.iter().enumerate() {
        let side = input_size / stride;
        let scores = &heads.scores[s];
        let boxes = &heads.boxes[s];
        let kps = &heads.landmarks[s];

        if scores.nrows() != side * side {
            anyhow::bail!(
                "stride {} expects a {}x{} grid, got {} cells",
                stride,
                side,
                side,
                scores.nrows()
            );
        }

        let stride = stride as f32;
        for row in 0..side {
            for col in 0..side {
                let idx = row * side + col;
                let score = scores[[idx, 0]];
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + boxes[[idx, 0]]) * stride;
                let cy = (row as f32 + boxes[[idx, 1]]) * stride;
                let w = boxes[[idx, 2]].exp() * stride;
                let h = boxes[[idx, 3]].exp() * stride;
                if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
                    continue;
                }

                let mut landmarks = [0.0f32; 10];
                for k in 0..5 {
                    landmarks[k * 2] = (col as f32 + kps[[idx, k * 2]]) * stride;
                    landmarks[k * 2 + 1] = (row as f32 + kps[[idx, k * 2 + 1]]) * stride;
                }

                faces.push(RawFace {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                    landmarks,
                });
            }
        }
    }

    Ok(faces)
}
