use crate::face::Gender;
use crate::preprocess;
use anyhow::Result;
use image::RgbImage;
use ort::session::Session;

/// Age buckets of the GoogLeNet age model, as inclusive year ranges.
pub const AGE_BUCKETS: [(f32, f32); 8] = [
    (0.0, 2.0),
    (4.0, 6.0),
    (8.0, 12.0),
    (15.0, 20.0),
    (25.0, 32.0),
    (38.0, 43.0),
    (48.0, 53.0),
    (60.0, 100.0),
];

const INPUT_SIZE: u32 = 224;
const MEAN_BGR: [f32; 3] = [104.0, 117.0, 123.0];

/// Age and gender estimation from a face crop.
pub struct AgeGenderEstimator {
    age: Session,
    gender: Session,
}

impl AgeGenderEstimator {
    pub fn new(age: Session, gender: Session) -> Self {
        Self { age, gender }
    }

    pub fn estimate(&mut self, face: &RgbImage) -> Result<(f32, Gender)> {
        let input = preprocess::bgr_tensor(face, INPUT_SIZE, MEAN_BGR);
        let age_scores = preprocess::run_scores(&mut self.age, input.clone())?;
        let gender_scores = preprocess::run_scores(&mut self.gender, input)?;
        Ok((age_from_scores(&age_scores)?, gender_from_scores(&gender_scores)?))
    }
}

/// Expected age: bucket midpoints weighted by bucket probability.
pub fn age_from_scores(scores: &[f32]) -> Result<f32> {
    if scores.len() < AGE_BUCKETS.len() {
        anyhow::bail!(
            "age model returned {} scores, expected {}",
            scores.len(),
            AGE_BUCKETS.len()
        );
    }
    let probs = preprocess::as_probabilities(&scores[..AGE_BUCKETS.len()]);
    Ok(AGE_BUCKETS
        .iter()
        .zip(probs)
        .map(|((lo, hi), p)| (lo + hi) / 2.0 * p)
        .sum())
}

pub fn gender_from_scores(scores: &[f32]) -> Result<Gender> {
    match scores {
        [male, female, ..] => Ok(if female > male {
            Gender::Female
        } else {
            Gender::Male
        }),
        _ => anyhow::bail!("gender model returned {} scores, expected 2", scores.len()),
    }
}
