use std::path::{Path, PathBuf};
use std::fs;
use directories::ProjectDirs;
use crate::common::error::{FaceAuthError, Result};

const DEV_BASE_DIR: &str = "./dev_data";

/// Where the account store, model configuration and model files live.
#[derive(Debug, Clone)]
pub struct DataPaths {
    base_dir: PathBuf,
    dev: bool,
}

impl DataPaths {
    pub fn new(dev: bool) -> Result<Self> {
        let base_dir = if dev {
            PathBuf::from(DEV_BASE_DIR)
        } else {
            let dirs = ProjectDirs::from("com", "driveguard", "DriveGuard")
                .ok_or_else(|| FaceAuthError::Storage("Failed to get project dirs".into()))?;
            dirs.data_dir().to_path_buf()
        };

        fs::create_dir_all(&base_dir)?;
        if dev {
            fs::create_dir_all(base_dir.join("captures"))?;
            tracing::debug!("Development mode - using local directory: {}", base_dir.display());
        }

        Ok(Self { base_dir, dev })
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir, dev: false })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn is_development(&self) -> bool {
        self.dev
    }

    pub fn accounts_file(&self) -> PathBuf {
        self.base_dir.join("accounts.json")
    }

    pub fn model_config_file(&self) -> PathBuf {
        self.base_dir.join("model_config.json")
    }

    /// Relative model paths in the config resolve against this directory.
    pub fn resolve_model(&self, model_path: &Path) -> PathBuf {
        if model_path.is_relative() {
            self.base_dir.join(model_path)
        } else {
            model_path.to_path_buf()
        }
    }

    pub fn capture_path(&self, prefix: &str) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let dir = if self.dev {
            self.base_dir.join("captures")
        } else {
            std::env::temp_dir()
        };
        dir.join(format!("{}_{}.jpg", prefix, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn relative_models_resolve_under_base_dir() {
        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::with_base_dir(tmp.path()).unwrap();
        assert_eq!(
            paths.resolve_model(Path::new("models/w600k_r50.onnx")),
            tmp.path().join("models/w600k_r50.onnx")
        );
        assert_eq!(
            paths.resolve_model(Path::new("/opt/models/a.onnx")),
            PathBuf::from("/opt/models/a.onnx")
        );
    }

    #[test]
    fn store_files_live_in_base_dir() {
        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::with_base_dir(tmp.path().join("data")).unwrap();
        assert!(paths.base_dir().exists());
        assert_eq!(paths.accounts_file(), tmp.path().join("data/accounts.json"));
        assert_eq!(paths.model_config_file(), tmp.path().join("data/model_config.json"));
    }

    #[test]
    fn captures_taken_in_the_same_second_get_distinct_names() {
        let tmp = TempDir::new().unwrap();
        let paths = DataPaths::with_base_dir(tmp.path()).unwrap();

        let first = paths.capture_path("verify");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = paths.capture_path("verify");
        assert_ne!(first, second);

        let stem = first.file_stem().unwrap().to_str().unwrap();
        let millis = stem.rsplit('_').next().unwrap();
        assert_eq!(millis.len(), 3);
        assert!(millis.chars().all(|c| c.is_ascii_digit()));
    }
}
