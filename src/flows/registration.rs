use crate::common::{ErrorKind, FaceAuthError};
use crate::core::detector::{crop, largest_face};
use crate::core::service::FaceService;
use crate::storage::{AccountRecord, AccountStore, FaceData};
use image::RgbImage;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStage {
    Start,
    Detect,
    Extract,
    Encrypt,
    Persist,
    Done,
}

impl fmt::Display for RegistrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationStage::Start => "start",
            RegistrationStage::Detect => "detect",
            RegistrationStage::Extract => "extract",
            RegistrationStage::Encrypt => "encrypt",
            RegistrationStage::Persist => "persist",
            RegistrationStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("registration failed at {stage}: {error}")]
pub struct RegistrationFailure {
    pub stage: RegistrationStage,
    #[source]
    pub error: FaceAuthError,
}

impl RegistrationFailure {
    fn at(stage: RegistrationStage, error: FaceAuthError) -> Self {
        Self { stage, error }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl From<RegistrationFailure> for FaceAuthError {
    fn from(failure: RegistrationFailure) -> Self {
        tracing::debug!("Registration stopped at {}", failure.stage);
        failure.error
    }
}

/// Enrols a face: detect, extract, encrypt both payloads, then upsert the
/// account. Nothing is written unless every earlier stage succeeded.
#[derive(Clone)]
pub struct RegistrationFlow {
    service: Arc<FaceService>,
    store: Arc<AccountStore>,
}

impl RegistrationFlow {
    pub fn new(service: Arc<FaceService>, store: Arc<AccountStore>) -> Self {
        Self { service, store }
    }

    /// `account` must already be validated (username free or owned by the
    /// caller, driver id assigned). Its `face_data` is replaced.
    pub fn register(
        &self,
        frame: &RgbImage,
        mut account: AccountRecord,
    ) -> Result<AccountRecord, RegistrationFailure> {
        use RegistrationStage::*;

        if account.username.trim().is_empty() || account.password.is_empty() {
            return Err(RegistrationFailure::at(
                Start,
                FaceAuthError::Other(anyhow::anyhow!("username and password are required")),
            ));
        }
        tracing::info!("Registering face for {}", account.username);

        let detections = self.service.detect(frame);
        let face = largest_face(&detections)
            .and_then(|d| crop(frame, &d.bbox))
            .ok_or_else(|| RegistrationFailure::at(Detect, FaceAuthError::NoFaceDetected))?;
        tracing::debug!(
            "Using largest of {} face(s), crop {}x{}",
            detections.len(),
            face.width(),
            face.height()
        );

        let embedding = self
            .service
            .extract(&face)
            .ok_or_else(|| RegistrationFailure::at(Extract, FaceAuthError::EmbeddingExtraction))?;

        let vault = self.service.vault();
        let shape = [face.height() as usize, face.width() as usize, 3];
        let image_payload = vault
            .encrypt(face.as_raw(), &shape, &account.password)
            .map_err(|e| RegistrationFailure::at(Encrypt, e))?;
        let embedding_payload = vault
            .encrypt_bytes(&embedding.to_le_bytes(), &account.password)
            .map_err(|e| RegistrationFailure::at(Encrypt, e))?;

        account.face_data = Some(FaceData::new(
            image_payload,
            embedding_payload,
            self.service.model_tag(),
        ));

        self.store
            .upsert_user(account.clone())
            .map_err(|e| RegistrationFailure::at(Persist, e))?;

        tracing::info!("Face registered for {}", account.username);
        Ok(account)
    }

    /// Replaces the face of an existing account after checking its password.
    pub fn re_enroll(
        &self,
        frame: &RgbImage,
        username: &str,
        password: &str,
    ) -> Result<AccountRecord, RegistrationFailure> {
        let account = self
            .store
            .authenticate_password(username, password)
            .map_err(|e| RegistrationFailure::at(RegistrationStage::Start, e))?
            .ok_or_else(|| {
                RegistrationFailure::at(
                    RegistrationStage::Start,
                    FaceAuthError::AccountNotFound(username.to_string()),
                )
            })?;
        self.register(frame, account)
    }
}
