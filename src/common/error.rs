use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaceAuthError {
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("No face detected")]
    NoFaceDetected,

    #[error("Failed to extract face embedding")]
    EmbeddingExtraction,

    /// Deliberately carries no detail: a wrong password and a damaged
    /// payload must look the same to the caller.
    #[error("Wrong password or corrupt biometric data")]
    WrongPasswordOrCorruptData,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Face recognition unavailable: {0}")]
    BackendLoad(String),

    #[error("Invalid configuration {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Username already exists: {0}")]
    UsernameTaken(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FaceAuthError>;

/// Coarse classification used to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DeviceUnavailable,
    NoFaceFound,
    EmbeddingExtraction,
    WrongPasswordOrCorruptData,
    Storage,
    BackendLoad,
    Invalid,
}

impl ErrorKind {
    /// The capture guide re-arms by itself; the user keeps looking at the camera.
    pub fn auto_rearm(self) -> bool {
        matches!(self, ErrorKind::NoFaceFound | ErrorKind::EmbeddingExtraction)
    }

    /// Retrying without the user changing something first is pointless.
    pub fn requires_user_action(self) -> bool {
        matches!(self, ErrorKind::DeviceUnavailable | ErrorKind::BackendLoad)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::DeviceUnavailable => "device unavailable",
            ErrorKind::NoFaceFound => "no face found",
            ErrorKind::EmbeddingExtraction => "embedding extraction error",
            ErrorKind::WrongPasswordOrCorruptData => "wrong password or corrupt data",
            ErrorKind::Storage => "storage error",
            ErrorKind::BackendLoad => "backend load failure",
            ErrorKind::Invalid => "invalid request",
        };
        f.write_str(name)
    }
}

impl FaceAuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FaceAuthError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            FaceAuthError::NoFaceDetected => ErrorKind::NoFaceFound,
            FaceAuthError::EmbeddingExtraction => ErrorKind::EmbeddingExtraction,
            FaceAuthError::WrongPasswordOrCorruptData => ErrorKind::WrongPasswordOrCorruptData,
            FaceAuthError::Storage(_) | FaceAuthError::Io(_) => ErrorKind::Storage,
            FaceAuthError::BackendLoad(_) | FaceAuthError::Ort(_) => ErrorKind::BackendLoad,
            FaceAuthError::Config { .. }
            | FaceAuthError::AccountNotFound(_)
            | FaceAuthError::UsernameTaken(_)
            | FaceAuthError::Image(_)
            | FaceAuthError::Other(_) => ErrorKind::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_kinds_rearm_automatically() {
        assert!(FaceAuthError::NoFaceDetected.kind().auto_rearm());
        assert!(FaceAuthError::EmbeddingExtraction.kind().auto_rearm());
        assert!(!FaceAuthError::WrongPasswordOrCorruptData.kind().auto_rearm());
        assert!(!FaceAuthError::Storage("disk full".into()).kind().auto_rearm());
    }

    #[test]
    fn device_and_backend_failures_need_the_user() {
        assert!(FaceAuthError::DeviceUnavailable("/dev/video0".into())
            .kind()
            .requires_user_action());
        assert!(FaceAuthError::BackendLoad("missing model".into())
            .kind()
            .requires_user_action());
        assert!(!FaceAuthError::NoFaceDetected.kind().requires_user_action());
    }

    #[test]
    fn io_errors_count_as_storage_failures() {
        let err: FaceAuthError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
