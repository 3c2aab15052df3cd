pub mod config;
pub mod error;
pub mod paths;

pub use config::{
    CameraConfig, CaptureGuideConfig, DrowsinessConfig, FaceRecognitionConfig, ModelConfig,
};
pub use error::{ErrorKind, FaceAuthError, Result};
pub use paths::DataPaths;
