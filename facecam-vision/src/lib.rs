pub mod age_gender;
pub mod analyzer;
pub mod detector;
pub mod expression;
pub mod face;
pub mod model;
pub mod preprocess;
pub mod video;
pub mod yunet;

// Re-export commonly used types
pub use analyzer::{FaceAnalyzer, OnnxAnalyzer};
pub use face::{resize_detections, BoundingBox, Detection, Expressions, Gender, Point};
pub use model::{ModelAsset, ModelSet, ModelStore};
pub use video::{Camera, CaptureError, FrameSource, StillImage};
