use crate::common::{FaceRecognitionConfig, FaceAuthError, Result};
use crate::core::onnx::OnnxModel;
use crate::core::similarity::l2_norm;
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;
use std::path::Path;

pub const EMBEDDING_DIM: usize = 512;
/// Byte length of a serialised embedding (`EMBEDDING_DIM` little-endian f32s).
pub const EMBEDDING_BYTES: usize = EMBEDDING_DIM * 4;

const ARCFACE_INPUT: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
/// Crops smaller than this carry no usable identity.
const MIN_CROP_SIDE: u32 = 8;

/// Unit-norm identity vector. Only constructible through normalisation, so
/// every value in circulation satisfies `||v|| == 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// `None` for the wrong length, a zero vector or non-finite values.
    pub fn from_raw(values: Vec<f32>) -> Option<Self> {
        if values.len() != EMBEDDING_DIM || values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let norm = l2_norm(&values);
        if !(norm > 0.0) || !norm.is_finite() {
            return None;
        }
        Some(Self(values.into_iter().map(|v| v / norm).collect()))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Inverse of [`Embedding::to_le_bytes`]; re-normalises on the way in.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != EMBEDDING_BYTES {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::from_raw(values)
    }

    pub fn similarity(&self, other: &Embedding) -> f32 {
        crate::core::similarity::cosine_similarity(&self.0, &other.0)
    }
}

/// Maps a face crop to an identity embedding. `None` means no usable face.
pub trait EmbeddingBackend: Send + Sync {
    fn extract(&self, face: &RgbImage) -> Option<Embedding>;
}

/// ArcFace (112x112 RGB) recogniser running through ONNX Runtime.
pub struct FaceRecognizer {
    model: OnnxModel,
}

impl FaceRecognizer {
    pub fn load(config: &FaceRecognitionConfig, model_path: &Path) -> Result<Self> {
        let model = OnnxModel::load("face_recognizer", model_path, config.optimization_level)?;
        Ok(Self { model })
    }

    fn try_extract(&self, face: &RgbImage) -> Result<Embedding> {
        if face.width() < MIN_CROP_SIDE || face.height() < MIN_CROP_SIDE {
            return Err(FaceAuthError::EmbeddingExtraction);
        }

        let input = preprocess_face(face);
        let (raw, shape) = self.model.run(input)?;
        tracing::trace!("Recognizer output shape {:?}", shape);

        // Batch of one: the primary identity is the first EMBEDDING_DIM values.
        let primary: Vec<f32> = raw.into_iter().take(EMBEDDING_DIM).collect();
        Embedding::from_raw(primary).ok_or(FaceAuthError::EmbeddingExtraction)
    }
}

impl EmbeddingBackend for FaceRecognizer {
    fn extract(&self, face: &RgbImage) -> Option<Embedding> {
        match self.try_extract(face) {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                tracing::warn!("Embedding extraction failed: {}", e);
                None
            }
        }
    }
}

/// Resize to 112x112 and normalise each RGB channel to [-1, 1], NCHW.
fn preprocess_face(face: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(face, ARCFACE_INPUT, ARCFACE_INPUT, FilterType::Triangle);
    let size = ARCFACE_INPUT as usize;
    let mut array = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            array[[0, c, y, x]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }

    array
}
