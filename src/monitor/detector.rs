use crate::common::{DrowsinessConfig, Result};
use crate::core::detector::BoundingBox;
use crate::core::OnnxModel;
use crate::core::yolo;
use image::RgbImage;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledDetection {
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrowsinessAssessment {
    pub detections: Vec<LabeledDetection>,
    pub drowsy: bool,
}

/// Per-frame eye-state classifier. Failures read as "not drowsy".
pub trait DrowsinessModel: Send + Sync {
    fn assess(&self, frame: &RgbImage) -> DrowsinessAssessment;
}

/// Case-insensitive substring match against the configured keywords.
pub fn is_drowsy_label(label: &str, keywords: &[String]) -> bool {
    let label = label.to_lowercase();
    keywords.iter().any(|k| label.contains(&k.to_lowercase()))
}

pub struct DrowsinessDetector {
    model: OnnxModel,
    config: DrowsinessConfig,
}

impl DrowsinessDetector {
    pub fn load(config: &DrowsinessConfig, model_path: &Path, optimization_level: u32) -> Result<Self> {
        let model = OnnxModel::load("drowsiness", model_path, optimization_level)?;
        Ok(Self {
            model,
            config: config.clone(),
        })
    }

    fn label(&self, class_id: usize) -> String {
        self.config
            .class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }

    fn try_assess(&self, frame: &RgbImage) -> Result<DrowsinessAssessment> {
        let size = self.config.input_size;
        let (output, shape) = self.model.run(yolo::image_to_tensor(frame, size, size))?;

        let raw = yolo::decode(
            &output,
            &shape,
            self.config.class_names.len(),
            size,
            size,
            self.config.confidence_threshold,
        );
        let kept = yolo::non_max_suppression(raw, self.config.iou_threshold);

        let scale_x = frame.width() as f32 / size as f32;
        let scale_y = frame.height() as f32 / size as f32;
        let detections: Vec<LabeledDetection> = kept
            .into_iter()
            .map(|mut b| {
                yolo::rescale(&mut b, scale_x, scale_y);
                LabeledDetection {
                    class_id: b.class_id,
                    label: self.label(b.class_id),
                    confidence: b.confidence,
                    bbox: BoundingBox::new(b.x1, b.y1, b.width(), b.height()),
                }
            })
            .collect();

        let drowsy = detections
            .iter()
            .any(|d| is_drowsy_label(&d.label, &self.config.drowsy_keywords));
        Ok(DrowsinessAssessment { detections, drowsy })
    }
}

impl DrowsinessModel for DrowsinessDetector {
    fn assess(&self, frame: &RgbImage) -> DrowsinessAssessment {
        match self.try_assess(frame) {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::warn!("Drowsiness inference failed: {}", e);
                DrowsinessAssessment::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DrowsinessConfig;

    #[test]
    fn keyword_matching_is_case_insensitive_substring() {
        let keywords = DrowsinessConfig::default().drowsy_keywords;
        assert!(is_drowsy_label("closed_eye", &keywords));
        assert!(is_drowsy_label("Eye_Closed", &keywords));
        assert!(is_drowsy_label("Drowsy", &keywords));
        assert!(!is_drowsy_label("open_eye", &keywords));
        assert!(!is_drowsy_label("yawn", &keywords));
    }

    #[test]
    fn missing_model_is_a_load_error() {
        let config = DrowsinessConfig::default();
        let err = DrowsinessDetector::load(&config, Path::new("/nonexistent/drowsy.onnx"), 3)
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::common::ErrorKind::BackendLoad);
    }
}
