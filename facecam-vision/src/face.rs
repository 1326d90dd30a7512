use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Axis-aligned face box in pixels: origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Linear per-axis rescale, e.g. from frame pixels to display pixels.
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let inter = (x2 - x1) * (y2 - y1);
        inter / (self.area() + other.area() - inter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => f.write_str("male"),
            Gender::Female => f.write_str("female"),
        }
    }
}

/// Expression label -> probability. Classifier outputs are independent, so
/// the values need not sum to exactly one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expressions(BTreeMap<String, f32>);

impl Expressions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Label with the highest probability.
    ///
    /// Iteration is in label order and only a strictly greater value
    /// replaces the current best, so ties resolve to the lexicographically
    /// smallest label. NaN never wins.
    pub fn top(&self) -> Option<&str> {
        let mut best: Option<(&str, f32)> = None;
        for (label, p) in self.iter() {
            if p.is_nan() {
                continue;
            }
            match best {
                Some((_, bp)) if p <= bp => {}
                _ => best = Some((label, p)),
            }
        }
        best.map(|(label, _)| label)
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for Expressions {
    fn from_iter<T: IntoIterator<Item = (S, f32)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// One analyzed face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub score: f32,
    pub landmarks: Vec<Point>,
    pub expressions: Expressions,
    pub age: f32,
    pub gender: Gender,
}

impl Detection {
    /// Most probable expression, if the expression model reported any.
    pub fn mood(&self) -> Option<&str> {
        self.expressions.top()
    }

    /// Rescale box and landmarks by `(sx, sy)`.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            bbox: self.bbox.scale(sx, sy),
            landmarks: self
                .landmarks
                .iter()
                .map(|p| Point {
                    x: p.x * sx,
                    y: p.y * sy,
                })
                .collect(),
            ..self.clone()
        }
    }
}

/// Rescale every detection from `from` dimensions to `to` dimensions.
pub fn resize_detections(
    detections: &[Detection],
    from: (u32, u32),
    to: (u32, u32),
) -> Vec<Detection> {
    if from.0 == 0 || from.1 == 0 {
        return detections.to_vec();
    }
    let sx = to.0 as f32 / from.0 as f32;
    let sy = to.1 as f32 / from.1 as f32;
    detections.iter().map(|d| d.scaled(sx, sy)).collect()
}
