//! The long-lived face service shared by registration, verification and
//! the capture guide. Built once at start-up and handed around in an `Arc`.

use crate::common::{DataPaths, FaceAuthError, FaceRecognitionConfig, Result};
use crate::core::detector::{filter_detections, Detection, FaceDetection, FaceDetector};
use crate::core::recognizer::{Embedding, EmbeddingBackend, FaceRecognizer};
use crate::core::vault::Vault;
use image::RgbImage;
use std::sync::{Arc, RwLock};

/// Thresholds an administrator may change while the application runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSettings {
    pub cosine_threshold: f32,
    pub high_confidence_cutoff: f32,
    pub confidence_threshold: f32,
    pub min_face_size: u32,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self::from(&FaceRecognitionConfig::default())
    }
}

impl From<&FaceRecognitionConfig> for MatchSettings {
    fn from(config: &FaceRecognitionConfig) -> Self {
        Self {
            cosine_threshold: config.cosine_threshold,
            high_confidence_cutoff: config.high_confidence_cutoff,
            confidence_threshold: config.confidence_threshold,
            min_face_size: config.min_face_size,
        }
    }
}

impl MatchSettings {
    fn validate(&self) -> std::result::Result<(), String> {
        for (name, value) in [
            ("cosine_threshold", self.cosine_threshold),
            ("high_confidence_cutoff", self.high_confidence_cutoff),
            ("confidence_threshold", self.confidence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be between 0.0 and 1.0, got {}", name, value));
            }
        }
        Ok(())
    }
}

pub struct FaceService {
    detector: Arc<dyn FaceDetection>,
    extractor: Arc<dyn EmbeddingBackend>,
    vault: Vault,
    settings: RwLock<MatchSettings>,
    model_tag: String,
}

impl FaceService {
    /// Loads both ONNX models. Either failing is a `BackendLoad` error.
    pub fn load(config: &FaceRecognitionConfig, paths: &DataPaths) -> Result<Self> {
        let detector = FaceDetector::load(config, &paths.resolve_model(&config.detector_model_path))?;
        let recognizer = FaceRecognizer::load(config, &paths.resolve_model(&config.model_path))?;

        let mut service = Self::with_backends(
            Arc::new(detector),
            Arc::new(recognizer),
            MatchSettings::from(config),
        );
        service.model_tag = config.model_name.clone();
        Ok(service)
    }

    pub fn with_backends(
        detector: Arc<dyn FaceDetection>,
        extractor: Arc<dyn EmbeddingBackend>,
        settings: MatchSettings,
    ) -> Self {
        Self {
            detector,
            extractor,
            vault: Vault::new(),
            settings: RwLock::new(settings),
            model_tag: "ArcFace".to_string(),
        }
    }

    pub fn with_vault(mut self, vault: Vault) -> Self {
        self.vault = vault;
        self
    }

    pub fn with_model_tag(mut self, tag: impl Into<String>) -> Self {
        self.model_tag = tag.into();
        self
    }

    pub fn settings(&self) -> MatchSettings {
        *self.settings.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn update_settings(&self, settings: MatchSettings) -> Result<()> {
        settings
            .validate()
            .map_err(|e| FaceAuthError::Other(anyhow::anyhow!("Invalid match settings: {}", e)))?;
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = settings;
        tracing::info!(
            cosine = settings.cosine_threshold,
            cutoff = settings.high_confidence_cutoff,
            "Match settings updated"
        );
        Ok(())
    }

    /// Faces passing the current confidence and size filters.
    pub fn detect(&self, image: &RgbImage) -> Vec<Detection> {
        let settings = self.settings();
        filter_detections(
            self.detector.detect(image),
            settings.confidence_threshold,
            settings.min_face_size,
        )
    }

    pub fn extract(&self, face: &RgbImage) -> Option<Embedding> {
        self.extractor.extract(face)
    }

    /// Presence pass on a down-scaled frame. `scale` is the frame width over
    /// the capture width, so `min_face_size` keeps meaning capture pixels.
    pub fn detect_presence(&self, image: &RgbImage, scale: f32) -> Vec<Detection> {
        let settings = self.settings();
        let min_size = (settings.min_face_size as f32 * scale).round() as u32;
        filter_detections(
            self.detector.detect_coarse(image),
            settings.confidence_threshold,
            min_size,
        )
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn model_tag(&self) -> &str {
        &self.model_tag
    }
}

/// Either a loaded service or the reason it could not be loaded. A failed
/// slot never retries; every request fails fast with `BackendLoad`.
#[derive(Clone)]
pub enum FaceServiceSlot {
    Ready(Arc<FaceService>),
    Unavailable(String),
}

impl FaceServiceSlot {
    pub fn load(config: &FaceRecognitionConfig, paths: &DataPaths) -> Self {
        match FaceService::load(config, paths) {
            Ok(service) => FaceServiceSlot::Ready(Arc::new(service)),
            Err(e) => {
                tracing::error!("Face recognition unavailable: {}", e);
                FaceServiceSlot::Unavailable(e.to_string())
            }
        }
    }

    pub fn get(&self) -> Result<Arc<FaceService>> {
        match self {
            FaceServiceSlot::Ready(service) => Ok(Arc::clone(service)),
            FaceServiceSlot::Unavailable(reason) => Err(FaceAuthError::BackendLoad(reason.clone())),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, FaceServiceSlot::Ready(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorKind;
    use crate::core::detector::{faces_from_head, BoundingBox};
    use tempfile::TempDir;

    struct FixedDetector(Vec<Detection>);

    impl FaceDetection for FixedDetector {
        fn detect(&self, _image: &RgbImage) -> Vec<Detection> {
            self.0.clone()
        }
    }

    struct NoEmbedding;

    impl EmbeddingBackend for NoEmbedding {
        fn extract(&self, _face: &RgbImage) -> Option<Embedding> {
            None
        }
    }

    fn service() -> FaceService {
        let faces = vec![
            Detection { bbox: BoundingBox::new(0.0, 0.0, 100.0, 100.0), confidence: 0.9 },
            Detection { bbox: BoundingBox::new(0.0, 0.0, 100.0, 100.0), confidence: 0.6 },
        ];
        FaceService::with_backends(
            Arc::new(FixedDetector(faces)),
            Arc::new(NoEmbedding),
            MatchSettings::default(),
        )
    }

    #[test]
    fn detection_honours_live_settings() {
        let service = service();
        let image = RgbImage::new(10, 10);
        assert_eq!(service.detect(&image).len(), 1);

        let mut settings = service.settings();
        settings.confidence_threshold = 0.5;
        service.update_settings(settings).unwrap();
        assert_eq!(service.detect(&image).len(), 2);
    }

    /// Decodes a fixed 640px head the way the ONNX detector does, so nothing
    /// below the decode floor survives and nothing above it is filtered.
    struct HeadDetector {
        output: Vec<f32>,
        shape: Vec<usize>,
    }

    impl HeadDetector {
        fn new(predictions: &[[f32; 5]]) -> Self {
            let n = predictions.len();
            let mut output = vec![0.0; 5 * n];
            for (i, p) in predictions.iter().enumerate() {
                for (a, value) in p.iter().enumerate() {
                    output[a * n + i] = *value;
                }
            }
            Self { output, shape: vec![1, 5, n] }
        }
    }

    impl FaceDetection for HeadDetector {
        fn detect(&self, image: &RgbImage) -> Vec<Detection> {
            faces_from_head(&self.output, &self.shape, 640, image.width(), image.height())
        }
    }

    fn head_service() -> FaceService {
        let detector = HeadDetector::new(&[
            [320.0, 320.0, 200.0, 200.0, 0.92],
            [80.0, 80.0, 60.0, 60.0, 0.60],
            [560.0, 560.0, 30.0, 30.0, 0.95],
        ]);
        FaceService::with_backends(Arc::new(detector), Arc::new(NoEmbedding), MatchSettings::default())
    }

    #[test]
    fn loosening_thresholds_at_runtime_admits_more_faces() {
        let service = head_service();
        let image = RgbImage::new(640, 640);
        assert_eq!(service.detect(&image).len(), 1);

        let mut settings = service.settings();
        settings.confidence_threshold = 0.5;
        service.update_settings(settings).unwrap();
        assert_eq!(service.detect(&image).len(), 2);

        settings.min_face_size = 20;
        service.update_settings(settings).unwrap();
        assert_eq!(service.detect(&image).len(), 3);
    }

    #[test]
    fn presence_min_size_follows_the_frame_scale() {
        let service = head_service();
        let small = RgbImage::new(320, 320);

        // The 200px face shrinks to 100px and stays; the 60px one would be
        // 30px, under 40 at full scale but over 40 * 0.5.
        let mut settings = service.settings();
        settings.confidence_threshold = 0.5;
        service.update_settings(settings).unwrap();
        assert_eq!(service.detect_presence(&small, 1.0).len(), 1);
        assert_eq!(service.detect_presence(&small, 0.5).len(), 2);
    }

    #[test]
    fn invalid_settings_are_refused() {
        let service = service();
        let mut settings = service.settings();
        settings.cosine_threshold = 1.5;
        assert!(service.update_settings(settings).is_err());
        assert_eq!(service.settings().cosine_threshold, 0.5);
    }

    #[test]
    fn missing_models_leave_an_unavailable_slot() {
        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::with_base_dir(tmp.path()).unwrap();
        let slot = FaceServiceSlot::load(&FaceRecognitionConfig::default(), &paths);

        assert!(!slot.is_available());
        let err = slot.get().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::BackendLoad);
    }
}
