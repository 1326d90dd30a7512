pub mod annotate;
pub mod config;
pub mod overlay;
pub mod snapshot;

// Re-export vision types for convenience
pub use facecam_vision::{
    analyzer, face, video, Detection, FaceAnalyzer, FrameSource, OnnxAnalyzer,
};
