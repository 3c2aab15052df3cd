// Core modules
pub mod camera;
pub mod common;
pub mod core;
pub mod flows;
pub mod monitor;
pub mod storage;

// Re-export commonly used types
pub use common::{DataPaths, ErrorKind, FaceAuthError, ModelConfig, Result};
pub use core::{
    cosine_similarity, is_match, Embedding, EncryptedPayload, FaceService, FaceServiceSlot,
    MatchSettings, Vault,
};
pub use camera::{CaptureHandle, GuideState, LiveCapture};
pub use flows::{CaptureSession, MatchResult, RegistrationFlow, VerificationFlow};
pub use storage::{AccountRecord, AccountStore};
