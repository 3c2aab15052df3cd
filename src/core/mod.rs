pub mod detector;
mod onnx;
pub mod recognizer;
pub mod service;
pub mod similarity;
pub mod vault;
pub mod yolo;

pub use detector::{crop, largest_face, BoundingBox, Detection, FaceDetection, FaceDetector};
pub use onnx::OnnxModel;
pub use recognizer::{Embedding, EmbeddingBackend, FaceRecognizer, EMBEDDING_BYTES, EMBEDDING_DIM};
pub use service::{FaceService, FaceServiceSlot, MatchSettings};
pub use similarity::{cosine_similarity, is_match};
pub use vault::{EncryptedPayload, Vault, MIN_KDF_ITERATIONS};
