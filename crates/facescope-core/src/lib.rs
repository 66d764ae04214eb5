//! facescope-core: Live face preview analysis.
//!
//! Subsamples camera frames, maintains an adaptive background model, finds
//! the dominant face with SCRFD via ONNX Runtime, and tracks how consistent
//! the background is around that face over time.

pub mod background;
pub mod consistency;
pub mod detector;
pub mod frame;
pub mod pipeline;
pub mod render;
pub mod types;

pub use background::{BackgroundModel, RunningGaussian};
pub use consistency::{ConsistencyAnalyzer, ConsistencyHistory, ConsistencySample};
pub use detector::{FaceDetector, ScrfdDetector, ScrfdOptions};
pub use frame::{FrameError, GrayImage};
pub use pipeline::{FacePipeline, FrameReport, PipelineError, PipelineOptions};
pub use types::{Detection, FaceBox};

/// Default directory for ONNX model files: `$XDG_DATA_HOME/facescope/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("facescope/models")
}
