use crate::common::{FaceAuthError, Result};
use crate::core::detector::{crop, largest_face};
use crate::core::recognizer::Embedding;
use crate::core::service::FaceService;
use crate::core::similarity::is_match;
use crate::storage::{AccountRecord, AccountStore, FaceData};
use image::RgbImage;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    UnknownAccount,
    /// The account exists but has no face registered; prompt enrolment.
    NotEnrolled,
    WrongPasswordOrCorruptData,
    BelowThreshold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    pub similarity: f32,
    pub rejection: Option<Rejection>,
}

impl MatchResult {
    fn rejected(rejection: Rejection) -> Self {
        Self {
            matched: false,
            similarity: 0.0,
            rejection: Some(rejection),
        }
    }

    fn scored(similarity: f32, threshold: f32) -> Self {
        let matched = is_match(similarity, threshold);
        Self {
            matched,
            similarity,
            rejection: (!matched).then_some(Rejection::BelowThreshold),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Identified {
    pub account: AccountRecord,
    pub similarity: f32,
}

#[derive(Clone)]
pub struct VerificationFlow {
    service: Arc<FaceService>,
    store: Arc<AccountStore>,
}

impl VerificationFlow {
    pub fn new(service: Arc<FaceService>, store: Arc<AccountStore>) -> Self {
        Self { service, store }
    }

    /// Checks `frame` against one claimed account.
    ///
    /// Unknown or unenrolled accounts and undecryptable templates come back
    /// as `(false, 0.0)`. No face or no embedding in the frame is an error,
    /// which the capture session answers by re-arming.
    pub fn verify_face(&self, frame: &RgbImage, username: &str, password: &str) -> Result<MatchResult> {
        let Some(account) = self.store.find_user(username)? else {
            tracing::info!("Verify: unknown account {}", username);
            return Ok(MatchResult::rejected(Rejection::UnknownAccount));
        };
        let Some(face_data) = account.face_data.as_ref().filter(|f| f.is_complete()) else {
            tracing::info!("Verify: {} has no registered face", username);
            return Ok(MatchResult::rejected(Rejection::NotEnrolled));
        };

        let probe = self.probe_embedding(frame)?;
        let threshold = self.service.settings().cosine_threshold;

        let result = match self.stored_embedding(face_data, password) {
            Ok(stored) => MatchResult::scored(probe.similarity(&stored), threshold),
            Err(_) => MatchResult::rejected(Rejection::WrongPasswordOrCorruptData),
        };
        tracing::info!(
            "Verify {}: matched={} similarity={:.4}",
            username,
            result.matched,
            result.similarity
        );
        Ok(result)
    }

    /// Open-set identification for face-only login.
    ///
    /// Each enrolled template is decrypted with the password stored in its
    /// own record. The best match at or above the threshold wins; the scan
    /// stops early once a score exceeds the high-confidence cutoff.
    pub fn identify_face(&self, frame: &RgbImage) -> Result<Option<Identified>> {
        let probe = self.probe_embedding(frame)?;
        let settings = self.service.settings();
        let candidates = self.store.enrolled_users()?;
        tracing::debug!("Identify: scanning {} enrolled account(s)", candidates.len());

        let mut best: Option<Identified> = None;
        for account in candidates {
            let Some(face_data) = account.face_data.as_ref() else {
                continue;
            };
            let stored = match self.stored_embedding(face_data, &account.password) {
                Ok(stored) => stored,
                Err(e) => {
                    tracing::warn!("Identify: skipping {}: {}", account.username, e);
                    continue;
                }
            };

            let similarity = probe.similarity(&stored);
            tracing::debug!("Identify: {} scored {:.4}", account.username, similarity);
            if !is_match(similarity, settings.cosine_threshold) {
                continue;
            }

            let better = best.as_ref().map_or(true, |b| similarity > b.similarity);
            let early_exit = similarity > settings.high_confidence_cutoff;
            if better {
                best = Some(Identified { account, similarity });
            }
            if early_exit {
                tracing::debug!("Identify: high-confidence match, stopping scan");
                break;
            }
        }

        match &best {
            Some(found) => tracing::info!(
                "Identified {} (similarity {:.4})",
                found.account.username,
                found.similarity
            ),
            None => tracing::info!("Identify: no account matched"),
        }
        Ok(best)
    }

    fn probe_embedding(&self, frame: &RgbImage) -> Result<Embedding> {
        let detections = self.service.detect(frame);
        let face = largest_face(&detections)
            .and_then(|d| crop(frame, &d.bbox))
            .ok_or(FaceAuthError::NoFaceDetected)?;
        self.service
            .extract(&face)
            .ok_or(FaceAuthError::EmbeddingExtraction)
    }

    fn stored_embedding(&self, face_data: &FaceData, password: &str) -> Result<Embedding> {
        let bytes = self
            .service
            .vault()
            .decrypt(&face_data.embedding_payload(), password)?;
        Embedding::from_le_bytes(&bytes).ok_or(FaceAuthError::WrongPasswordOrCorruptData)
    }
}
