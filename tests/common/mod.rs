#![allow(dead_code)]

use driveguard::core::{
    BoundingBox, Detection, Embedding, EmbeddingBackend, FaceDetection, FaceService, MatchSettings,
    EMBEDDING_DIM,
};
use image::{Rgb, RgbImage};
use std::sync::Arc;

pub const FRAME_SIZE: u32 = 200;

/// Finds one face in the middle of any frame that is not entirely black.
pub struct CentreDetector;

impl FaceDetection for CentreDetector {
    fn detect(&self, image: &RgbImage) -> Vec<Detection> {
        if image.pixels().all(|p| p.0 == [0, 0, 0]) {
            return Vec::new();
        }
        let (w, h) = (image.width() as f32, image.height() as f32);
        vec![Detection {
            bbox: BoundingBox::new(w / 4.0, h / 4.0, w / 2.0, h / 2.0),
            confidence: 0.95,
        }]
    }
}

/// Identity is the mean colour of the crop: each channel drives its own
/// nearly orthogonal basis pattern.
pub struct ColourExtractor;

impl EmbeddingBackend for ColourExtractor {
    fn extract(&self, face: &RgbImage) -> Option<Embedding> {
        let n = (face.width() * face.height()) as f32;
        let mut mean = [0f32; 3];
        for p in face.pixels() {
            for c in 0..3 {
                mean[c] += p.0[c] as f32 / n;
            }
        }
        let values = (0..EMBEDDING_DIM)
            .map(|i| {
                let i = i as f32;
                mean[0] * (i * 1.0).cos() + mean[1] * (i * 0.7).sin() + mean[2] * (i * 1.3).cos()
            })
            .collect();
        Embedding::from_raw(values)
    }
}

/// Always fails, like a crop the recogniser cannot use.
pub struct BrokenExtractor;

impl EmbeddingBackend for BrokenExtractor {
    fn extract(&self, _face: &RgbImage) -> Option<Embedding> {
        None
    }
}

pub fn face(colour: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(FRAME_SIZE, FRAME_SIZE, Rgb(colour))
}

pub fn empty_frame() -> RgbImage {
    RgbImage::new(FRAME_SIZE, FRAME_SIZE)
}

pub fn service() -> Arc<FaceService> {
    Arc::new(FaceService::with_backends(
        Arc::new(CentreDetector),
        Arc::new(ColourExtractor),
        MatchSettings::default(),
    ))
}
