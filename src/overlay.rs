//! Display-surface overlay: a list of draw operations plus a rasterizer.

use facecam_vision::{BoundingBox, Detection};
use image::{Rgb, RgbImage};

pub const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const LABEL_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const LINE_WIDTH: u32 = 2;
pub const FONT_PX: u32 = 14;
/// Label baseline sits this far above the box.
pub const LABEL_OFFSET: f32 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    StrokeRect {
        rect: BoundingBox,
        color: Rgb<u8>,
        line_width: u32,
    },
    FillText {
        text: String,
        x: f32,
        y: f32,
        color: Rgb<u8>,
        font_px: u32,
    },
}

/// Overlay canvas matched to the display surface.
#[derive(Debug, Clone)]
pub struct Overlay {
    width: u32,
    height: u32,
    ops: Vec<DrawOp>,
}

impl Overlay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ops: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn stroke_rect(&mut self, rect: BoundingBox, color: Rgb<u8>, line_width: u32) {
        self.ops.push(DrawOp::StrokeRect {
            rect,
            color,
            line_width,
        });
    }

    pub fn fill_text(&mut self, text: String, x: f32, y: f32, color: Rgb<u8>, font_px: u32) {
        self.ops.push(DrawOp::FillText {
            text,
            x,
            y,
            color,
            font_px,
        });
    }

    /// Box and label for one detection already in display coordinates.
    pub fn annotate(&mut self, detection: &Detection) {
        let b = detection.bbox;
        self.stroke_rect(b, BOX_COLOR, LINE_WIDTH);
        self.fill_text(
            label(detection),
            b.x,
            b.y - LABEL_OFFSET,
            LABEL_COLOR,
            FONT_PX,
        );
    }

    /// Labels in draw order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::FillText { text, .. } => Some(text.as_str()),
            DrawOp::StrokeRect { .. } => None,
        })
    }

    /// Rasterize rectangles onto `target`, which must be display-sized.
    ///
    /// Text is not rasterized; a solid tab marks where each label sits.
    pub fn render_onto(&self, target: &mut RgbImage) {
        for op in &self.ops {
            match op {
                DrawOp::StrokeRect {
                    rect,
                    color,
                    line_width,
                } => stroke_rect(target, rect, *color, *line_width),
                DrawOp::FillText {
                    x,
                    y,
                    color,
                    font_px,
                    ..
                } => {
                    // tab from the baseline up by font size, FONT_PX wide
                    let tab = BoundingBox::new(
                        *x,
                        y - *font_px as f32,
                        *font_px as f32,
                        *font_px as f32,
                    );
                    fill_rect(target, &tab, *color);
                }
            }
        }
    }
}

/// `Age: {rounded age}, Gender: {gender}, Mood: {mood}`.
pub fn label(detection: &Detection) -> String {
    format!(
        "Age: {}, Gender: {}, Mood: {}",
        detection.age.round() as i64,
        detection.gender,
        detection.mood().unwrap_or("unknown")
    )
}

/// Stroke centered on the rectangle's edges, like a canvas `strokeRect`.
fn stroke_rect(target: &mut RgbImage, rect: &BoundingBox, color: Rgb<u8>, line_width: u32) {
    let half = line_width as f32 / 2.0;
    let (x0, y0) = (rect.x, rect.y);
    let (x1, y1) = (rect.x + rect.width, rect.y + rect.height);
    let outer_w = rect.width + 2.0 * half;
    let lw = line_width as f32;

    fill_rect(target, &BoundingBox::new(x0 - half, y0 - half, outer_w, lw), color);
    fill_rect(target, &BoundingBox::new(x0 - half, y1 - half, outer_w, lw), color);
    fill_rect(
        target,
        &BoundingBox::new(x0 - half, y0 - half, lw, rect.height + lw),
        color,
    );
    fill_rect(
        target,
        &BoundingBox::new(x1 - half, y0 - half, lw, rect.height + lw),
        color,
    );
}

fn fill_rect(target: &mut RgbImage, rect: &BoundingBox, color: Rgb<u8>) {
    let (w, h) = target.dimensions();
    let x0 = rect.x.round().clamp(0.0, w as f32) as u32;
    let y0 = rect.y.round().clamp(0.0, h as f32) as u32;
    let x1 = (rect.x + rect.width).round().clamp(0.0, w as f32) as u32;
    let y1 = (rect.y + rect.height).round().clamp(0.0, h as f32) as u32;
    for y in y0..y1 {
        for x in x0..x1 {
            target.put_pixel(x, y, color);
        }
    }
}
