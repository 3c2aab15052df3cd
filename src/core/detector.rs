use crate::common::{FaceRecognitionConfig, Result};
use crate::core::onnx::OnnxModel;
use crate::core::yolo;
use image::{imageops, RgbImage};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

const FACE_NMS_IOU: f32 = 0.45;

/// Axis-aligned box in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self::new(self.x * sx, self.y * sy, self.width * sx, self.height * sy)
    }

    /// Integer pixel rectangle clipped to an image, `None` when nothing is left.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x.floor().max(0.0).min(image_width as f32) as u32;
        let y1 = self.y.floor().max(0.0).min(image_height as f32) as u32;
        let x2 = (self.x + self.width).ceil().max(0.0).min(image_width as f32) as u32;
        let y2 = (self.y + self.height).ceil().max(0.0).min(image_height as f32) as u32;

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Anything that can find faces in a frame. Backend failures surface as an
/// empty list, the uniform "no face" signal.
pub trait FaceDetection: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Vec<Detection>;

    /// Cheaper pass used by the live presence check on down-scaled frames.
    fn detect_coarse(&self, image: &RgbImage) -> Vec<Detection> {
        self.detect(image)
    }
}

/// Cuts a face out of the frame; the box is clipped to the image first.
pub fn crop(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (x, y, w, h) = bbox.clamp_to(image.width(), image.height())?;
    Some(imageops::crop_imm(image, x, y, w, h).to_image())
}

pub fn largest_face(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .max_by(|a, b| a.bbox.area().total_cmp(&b.bbox.area()))
}

/// Drops detections under the confidence threshold or smaller than
/// `min_face_size` in either dimension.
pub fn filter_detections(
    detections: Vec<Detection>,
    confidence_threshold: f32,
    min_face_size: u32,
) -> Vec<Detection> {
    let min_size = min_face_size as f32;
    detections
        .into_iter()
        .filter(|d| d.confidence >= confidence_threshold)
        .filter(|d| d.bbox.width >= min_size && d.bbox.height >= min_size)
        .collect()
}

/// Floor applied while decoding the head. Real thresholds are applied by the
/// caller so they can change at runtime.
pub const DETECTION_FLOOR: f32 = 0.1;

/// Turns a raw YOLOv8-face head into detections in source-image pixels.
/// Only the decode floor and NMS are applied here.
pub fn faces_from_head(
    output: &[f32],
    shape: &[usize],
    input_size: u32,
    image_width: u32,
    image_height: u32,
) -> Vec<Detection> {
    let raw = yolo::decode(output, shape, 1, input_size, input_size, DETECTION_FLOOR);
    let kept = yolo::non_max_suppression(raw, FACE_NMS_IOU);

    let scale_x = image_width as f32 / input_size as f32;
    let scale_y = image_height as f32 / input_size as f32;
    kept.into_iter()
        .map(|mut b| {
            yolo::rescale(&mut b, scale_x, scale_y);
            Detection {
                bbox: BoundingBox::new(b.x1, b.y1, b.width(), b.height()),
                confidence: b.confidence,
            }
        })
        .collect()
}

/// YOLOv8-face detector running through ONNX Runtime.
///
/// `detect` runs at the configured input size; `detect_coarse` runs at the
/// smaller presence size and falls back to the full size for exports with a
/// fixed input shape.
pub struct FaceDetector {
    model: OnnxModel,
    input_size: u32,
    coarse_input_size: u32,
    coarse_unsupported: AtomicBool,
}

impl FaceDetector {
    pub fn load(config: &FaceRecognitionConfig, model_path: &Path) -> Result<Self> {
        let model = OnnxModel::load("face_detector", model_path, config.optimization_level)?;
        Ok(Self {
            model,
            input_size: config.detector_input_size,
            coarse_input_size: config.presence_input_size.min(config.detector_input_size),
            coarse_unsupported: AtomicBool::new(false),
        })
    }

    fn try_detect(&self, image: &RgbImage, input_size: u32) -> Result<Vec<Detection>> {
        let tensor = yolo::image_to_tensor(image, input_size, input_size);
        let (output, shape) = self.model.run(tensor)?;
        Ok(faces_from_head(&output, &shape, input_size, image.width(), image.height()))
    }

    fn detect_at(&self, image: &RgbImage, input_size: u32) -> Vec<Detection> {
        match self.try_detect(image, input_size) {
            Ok(faces) => {
                tracing::debug!("Detected {} face(s) at {}px", faces.len(), input_size);
                faces
            }
            Err(e) => {
                tracing::warn!("Face detection failed: {}", e);
                Vec::new()
            }
        }
    }
}

impl FaceDetection for FaceDetector {
    fn detect(&self, image: &RgbImage) -> Vec<Detection> {
        self.detect_at(image, self.input_size)
    }

    fn detect_coarse(&self, image: &RgbImage) -> Vec<Detection> {
        if self.coarse_input_size == self.input_size || self.coarse_unsupported.load(Ordering::Relaxed) {
            return self.detect(image);
        }
        match self.try_detect(image, self.coarse_input_size) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(
                    "Detector rejected {}px input ({}); presence checks use {}px",
                    self.coarse_input_size,
                    e,
                    self.input_size
                );
                self.coarse_unsupported.store(true, Ordering::Relaxed);
                self.detect(image)
            }
        }
    }
}
