use crate::common::{FaceAuthError, Result};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;

/// An ONNX Runtime session. Inference needs exclusive access, so concurrent
/// callers queue on the lock.
pub struct OnnxModel {
    name: String,
    session: Mutex<Session>,
}

impl OnnxModel {
    /// Any failure here is a permanent capability loss for the session.
    pub fn load(name: &str, model_path: &Path, optimization_level: u32) -> Result<Self> {
        if !model_path.exists() {
            return Err(FaceAuthError::BackendLoad(format!(
                "{} model not found at: {}",
                name,
                model_path.display()
            )));
        }

        let opt_level = match optimization_level {
            0 => GraphOptimizationLevel::Disable,
            1 => GraphOptimizationLevel::Level1,
            2 => GraphOptimizationLevel::Level2,
            _ => GraphOptimizationLevel::Level3,
        };

        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(opt_level))
            .and_then(|builder| builder.commit_from_file(model_path))
            .map_err(|e| {
                FaceAuthError::BackendLoad(format!(
                    "Failed to load {} model {}: {}",
                    name,
                    model_path.display(),
                    e
                ))
            })?;

        tracing::info!("Loaded {} model from {}", name, model_path.display());
        Ok(Self {
            name: name.to_string(),
            session: Mutex::new(session),
        })
    }

    /// Runs a single NCHW input and returns the first output flattened with its shape.
    pub fn run(&self, input: Array4<f32>) -> Result<(Vec<f32>, Vec<usize>)> {
        let (n, c, h, w) = input.dim();
        let data = if input.is_standard_layout() {
            input.into_raw_vec()
        } else {
            input.iter().copied().collect()
        };
        let tensor = Tensor::from_array(([n, c, h, w], data))?;

        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let outputs = session.run(ort::inputs![tensor])?;
        if outputs.len() == 0 {
            return Err(FaceAuthError::Other(anyhow::anyhow!(
                "{} model produced no outputs",
                self.name
            )));
        }

        let (shape, values) = outputs[0].try_extract_tensor::<f32>()?;
        let shape: Vec<usize> = shape.as_ref().iter().map(|&d| d.max(0) as usize).collect();
        Ok((values.to_vec(), shape))
    }
}
