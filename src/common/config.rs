use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::common::error::{FaceAuthError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ModelConfig {
    #[serde(default)]
    pub face_recognition: FaceRecognitionConfig,
    #[serde(default)]
    pub drowsiness_detection: DrowsinessConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub capture_guide: CaptureGuideConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FaceRecognitionConfig {
    #[serde(default = "default_face_model_name")]
    pub model_name: String,
    /// Embedding (ArcFace) model.
    #[serde(default = "default_recognizer_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_detector_path")]
    pub detector_model_path: PathBuf,
    #[serde(default = "default_face_confidence")]
    pub confidence_threshold: f32,
    #[serde(default = "default_min_face_size")]
    pub min_face_size: u32,
    #[serde(default = "default_cosine_threshold")]
    pub cosine_threshold: f32,
    /// Open-set identify stops scanning once a candidate scores above this.
    #[serde(default = "default_high_confidence_cutoff")]
    pub high_confidence_cutoff: f32,
    #[serde(default = "default_detector_input_size")]
    pub detector_input_size: u32,
    /// Detector input for the live presence check; needs an export with
    /// dynamic input axes, otherwise `detector_input_size` is used.
    #[serde(default = "default_presence_input_size")]
    pub presence_input_size: u32,
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_face_model_name() -> String { "ArcFace (v2.1)".to_string() }
fn default_recognizer_path() -> PathBuf { PathBuf::from("models/w600k_r50.onnx") }
fn default_detector_path() -> PathBuf { PathBuf::from("models/yolov8n-face.onnx") }
fn default_face_confidence() -> f32 { 0.75 }
fn default_min_face_size() -> u32 { 40 }
fn default_cosine_threshold() -> f32 { 0.5 }
fn default_high_confidence_cutoff() -> f32 { 0.90 }
fn default_detector_input_size() -> u32 { 640 }
fn default_presence_input_size() -> u32 { 320 }
fn default_optimization_level() -> u32 { 3 }

impl Default for FaceRecognitionConfig {
    fn default() -> Self {
        Self {
            model_name: default_face_model_name(),
            model_path: default_recognizer_path(),
            detector_model_path: default_detector_path(),
            confidence_threshold: default_face_confidence(),
            min_face_size: default_min_face_size(),
            cosine_threshold: default_cosine_threshold(),
            high_confidence_cutoff: default_high_confidence_cutoff(),
            detector_input_size: default_detector_input_size(),
            presence_input_size: default_presence_input_size(),
            optimization_level: default_optimization_level(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DrowsinessConfig {
    #[serde(default = "default_drowsy_model_name")]
    pub model_name: String,
    #[serde(default = "default_drowsy_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_drowsy_confidence")]
    pub confidence_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    /// Class index -> label, in model output order.
    #[serde(default = "default_class_names")]
    pub class_names: Vec<String>,
    #[serde(default = "default_drowsy_keywords")]
    pub drowsy_keywords: Vec<String>,
    #[serde(default = "default_alert_after_ms")]
    pub alert_after_ms: u64,
    #[serde(default = "default_drowsy_input_size")]
    pub input_size: u32,
}

fn default_drowsy_model_name() -> String { "YOLOv8n-Drowsy (v1.0)".to_string() }
fn default_drowsy_path() -> PathBuf { PathBuf::from("models/drowsy.onnx") }
fn default_drowsy_confidence() -> f32 { 0.15 }
fn default_iou_threshold() -> f32 { 0.45 }
fn default_class_names() -> Vec<String> {
    vec!["open_eye".to_string(), "closed_eye".to_string()]
}
fn default_drowsy_keywords() -> Vec<String> {
    ["close", "closed", "sleep", "drowsy", "eye_close"]
        .iter()
        .map(|k| k.to_string())
        .collect()
}
fn default_alert_after_ms() -> u64 { 1500 }
fn default_drowsy_input_size() -> u32 { 640 }

impl Default for DrowsinessConfig {
    fn default() -> Self {
        Self {
            model_name: default_drowsy_model_name(),
            model_path: default_drowsy_path(),
            confidence_threshold: default_drowsy_confidence(),
            iou_threshold: default_iou_threshold(),
            class_names: default_class_names(),
            drowsy_keywords: default_drowsy_keywords(),
            alert_after_ms: default_alert_after_ms(),
            input_size: default_drowsy_input_size(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CaptureGuideConfig {
    #[serde(default = "default_detection_interval")]
    pub detection_interval_ms: u64,
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_presence_width")]
    pub presence_width: u32,
    #[serde(default = "default_presence_height")]
    pub presence_height: u32,
    #[serde(default = "default_display_width")]
    pub display_width: u32,
    #[serde(default = "default_display_height")]
    pub display_height: u32,
    /// Upper bound on the normalised elliptical distance of the face centre.
    #[serde(default = "default_oval_margin")]
    pub oval_margin: f32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// 0 keeps single-shot capture on the first positive check.
    #[serde(default)]
    pub dwell_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub frame_queue_capacity: usize,
}

fn default_detection_interval() -> u64 { 500 }
fn default_frame_interval() -> u64 { 33 }
fn default_presence_width() -> u32 { 320 }
fn default_presence_height() -> u32 { 240 }
fn default_display_width() -> u32 { 480 }
fn default_display_height() -> u32 { 360 }
fn default_oval_margin() -> f32 { 1.5 }
fn default_jpeg_quality() -> u8 { 45 }
fn default_queue_capacity() -> usize { 2 }

impl Default for CaptureGuideConfig {
    fn default() -> Self {
        Self {
            detection_interval_ms: default_detection_interval(),
            frame_interval_ms: default_frame_interval(),
            presence_width: default_presence_width(),
            presence_height: default_presence_height(),
            display_width: default_display_width(),
            display_height: default_display_height(),
            oval_margin: default_oval_margin(),
            jpeg_quality: default_jpeg_quality(),
            dwell_ms: 0,
            frame_queue_capacity: default_queue_capacity(),
        }
    }
}

impl ModelConfig {
    /// Loads the configuration, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Model config {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        tracing::info!("Loading model config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: ModelConfig = serde_json::from_str(&contents).map_err(|e| FaceAuthError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        config.validate().map_err(|message| FaceAuthError::Config {
            path: path.to_path_buf(),
            message,
        })?;

        let face = &config.face_recognition;
        tracing::info!(
            model = %face.model_name,
            confidence = face.confidence_threshold,
            min_face_size = face.min_face_size,
            cosine = face.cosine_threshold,
            "Face recognition settings loaded"
        );
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate().map_err(|message| FaceAuthError::Config {
            path: path.to_path_buf(),
            message,
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FaceAuthError::Other(anyhow::anyhow!("Config serialize error: {}", e)))?;
        std::fs::write(path, json)?;
        tracing::info!("Saved model config to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let face = &self.face_recognition;
        check_unit("face_recognition.confidence_threshold", face.confidence_threshold)?;
        check_unit("face_recognition.cosine_threshold", face.cosine_threshold)?;
        check_unit("face_recognition.high_confidence_cutoff", face.high_confidence_cutoff)?;
        if face.detector_input_size == 0 || face.detector_input_size > 4096 {
            return Err(format!(
                "face_recognition.detector_input_size must be between 1 and 4096, got {}",
                face.detector_input_size
            ));
        }

        if face.presence_input_size == 0 || face.presence_input_size > 4096 {
            return Err(format!(
                "face_recognition.presence_input_size must be between 1 and 4096, got {}",
                face.presence_input_size
            ));
        }

        let drowsy = &self.drowsiness_detection;
        check_unit("drowsiness_detection.confidence_threshold", drowsy.confidence_threshold)?;
        check_unit("drowsiness_detection.iou_threshold", drowsy.iou_threshold)?;
        if drowsy.input_size == 0 || drowsy.input_size > 4096 {
            return Err(format!(
                "drowsiness_detection.input_size must be between 1 and 4096, got {}",
                drowsy.input_size
            ));
        }

        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(format!("camera.width must be between 1 and 4096, got {}", self.camera.width));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(format!("camera.height must be between 1 and 4096, got {}", self.camera.height));
        }

        let guide = &self.capture_guide;
        if guide.presence_width == 0 || guide.presence_height == 0 {
            return Err("capture_guide presence size must be non-zero".to_string());
        }
        if guide.display_width == 0 || guide.display_height == 0 {
            return Err("capture_guide display size must be non-zero".to_string());
        }
        if !(guide.oval_margin > 0.0) {
            return Err(format!("capture_guide.oval_margin must be positive, got {}", guide.oval_margin));
        }
        if guide.jpeg_quality == 0 || guide.jpeg_quality > 100 {
            return Err(format!(
                "capture_guide.jpeg_quality must be between 1 and 100, got {}",
                guide.jpeg_quality
            ));
        }
        if guide.frame_queue_capacity == 0 {
            return Err("capture_guide.frame_queue_capacity must be at least 1".to_string());
        }

        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> std::result::Result<(), String> {
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{} must be between 0.0 and 1.0, got {}", name, value));
    }
    Ok(())
}
