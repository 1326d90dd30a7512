use anyhow::{Context, Result};
use image::RgbImage;

use crate::age_gender::AgeGenderEstimator;
use crate::detector::FaceDetector;
use crate::expression::ExpressionClassifier;
use crate::face::Detection;
use crate::model::{self, ModelSet, ModelStore};
use crate::preprocess;

/// Grows the detector box before classification so hair and chin are included.
const CROP_MARGIN: f32 = 0.15;

/// Anything that turns a frame into a list of analyzed faces.
///
/// Detections are in frame pixels, best detector score first.
pub trait FaceAnalyzer {
    fn analyze(&mut self, frame: &RgbImage) -> Result<Vec<Detection>>;
}

/// Full analysis: detect faces, then classify expression, age and gender per face.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    expressions: ExpressionClassifier,
    age_gender: AgeGenderEstimator,
}

impl OnnxAnalyzer {
    /// Resolve and load every model in `models`. Any missing asset is an error.
    pub fn load(
        store: &ModelStore,
        models: &ModelSet,
        score_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self> {
        let detector = model::load_session(store, &models.detector)?;
        let expression = model::load_session(store, &models.expression)?;
        let age = model::load_session(store, &models.age)?;
        let gender = model::load_session(store, &models.gender)?;
        Ok(Self {
            detector: FaceDetector::new(detector, score_threshold, nms_threshold),
            expressions: ExpressionClassifier::new(expression),
            age_gender: AgeGenderEstimator::new(age, gender),
        })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn analyze(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let regions = self.detector.detect(frame).context("detecting faces")?;

        let mut detections = Vec::with_capacity(regions.len());
        for region in regions {
            let Some(face) = preprocess::crop_face(frame, &region.bbox, CROP_MARGIN) else {
                log::debug!("skipping face at {:?}: outside the frame", region.bbox);
                continue;
            };
            let expressions = self
                .expressions
                .classify(&face)
                .context("classifying expression")?;
            let (age, gender) = self
                .age_gender
                .estimate(&face)
                .context("estimating age and gender")?;

            detections.push(Detection {
                bbox: region.bbox,
                score: region.score,
                landmarks: region.landmarks,
                expressions,
                age,
                gender,
            });
        }

        Ok(detections)
    }
}
