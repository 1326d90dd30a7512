use crate::face::Expressions;
use crate::preprocess;
use anyhow::Result;
use image::RgbImage;
use ort::session::Session;

/// FER+ output order.
pub const LABELS: [&str; 8] = [
    "neutral",
    "happy",
    "surprised",
    "sad",
    "angry",
    "disgusted",
    "fearful",
    "contempt",
];

const INPUT_SIZE: u32 = 64;

/// FER+ expression classifier over a face crop.
pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn classify(&mut self, face: &RgbImage) -> Result<Expressions> {
        let input = preprocess::gray_tensor(face, INPUT_SIZE);
        let logits = preprocess::run_scores(&mut self.session, input)?;
        expressions_from_logits(&logits)
    }
}

pub fn expressions_from_logits(logits: &[f32]) -> Result<Expressions> {
    if logits.len() < LABELS.len() {
        anyhow::bail!(
            "expression model returned {} scores, expected {}",
            logits.len(),
            LABELS.len()
        );
    }
    let probs = preprocess::softmax(&logits[..LABELS.len()]);
    Ok(LABELS.iter().copied().zip(probs).collect())
}
