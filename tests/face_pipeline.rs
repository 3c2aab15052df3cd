mod common;

use common::{empty_frame, face, service, BrokenExtractor, CentreDetector};
use driveguard::core::{FaceService, MatchSettings};
use driveguard::flows::{RegistrationFlow, RegistrationStage, Rejection, VerificationFlow};
use driveguard::storage::{AccountRecord, AccountStore};
use driveguard::{ErrorKind, FaceAuthError};
use std::sync::Arc;
use tempfile::TempDir;

const RED: [u8; 3] = [220, 0, 0];
const RED_VARIANT: [u8; 3] = [216, 4, 3];
const GREEN: [u8; 3] = [0, 220, 0];

struct Fixture {
    _tmp: TempDir,
    store: Arc<AccountStore>,
    registration: RegistrationFlow,
    verification: VerificationFlow,
    service: Arc<FaceService>,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(AccountStore::new(tmp.path().join("accounts.json")));
    let service = service();
    Fixture {
        registration: RegistrationFlow::new(Arc::clone(&service), Arc::clone(&store)),
        verification: VerificationFlow::new(Arc::clone(&service), Arc::clone(&store)),
        store,
        service,
        _tmp: tmp,
    }
}

fn account(username: &str, password: &str, driver_id: &str) -> AccountRecord {
    AccountRecord::new(username, password, username.to_uppercase(), "0900000000", driver_id)
}

#[test]
fn enrolled_face_verifies_with_right_password() {
    let f = fixture();
    f.registration
        .register(&face(RED), account("alice", "pw123", "TX001"))
        .unwrap();

    let result = f
        .verification
        .verify_face(&face(RED_VARIANT), "alice", "pw123")
        .unwrap();
    assert!(result.matched);
    assert!(result.similarity >= f.service.settings().cosine_threshold);
    assert_eq!(result.rejection, None);
}

#[test]
fn different_face_is_rejected() {
    let f = fixture();
    f.registration
        .register(&face(RED), account("alice", "pw123", "TX001"))
        .unwrap();

    let result = f.verification.verify_face(&face(GREEN), "alice", "pw123").unwrap();
    assert!(!result.matched);
    assert!(result.similarity < 0.5);
    assert_eq!(result.rejection, Some(Rejection::BelowThreshold));
}

#[test]
fn wrong_password_blocks_verification() {
    let f = fixture();
    f.registration
        .register(&face(RED), account("alice", "pw123", "TX001"))
        .unwrap();

    let result = f
        .verification
        .verify_face(&face(RED_VARIANT), "alice", "wrong_pw")
        .unwrap();
    assert!(!result.matched);
    assert_eq!(result.similarity, 0.0);
    assert_eq!(result.rejection, Some(Rejection::WrongPasswordOrCorruptData));
}

#[test]
fn first_registration_creates_the_document() {
    let f = fixture();
    assert!(!f.store.path().exists());

    f.registration
        .register(&face(RED), account("alice", "pw123", "TX001"))
        .unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(f.store.path()).unwrap()).unwrap();
    assert_eq!(raw["admin_accounts"], serde_json::json!([]));
    let users = raw["user_accounts"].as_array().unwrap();
    assert_eq!(users.len(), 1);

    let face_data = &users[0]["face_data"];
    for key in [
        "encrypted_image",
        "salt",
        "iv",
        "embedding_encrypted",
        "embedding_salt",
        "embedding_iv",
        "registered_at",
        "model",
    ] {
        assert!(face_data[key].is_string(), "missing {}", key);
    }
    assert_eq!(face_data["shape"], serde_json::json!([100, 100, 3]));
    assert_eq!(face_data["embedding_shape"], serde_json::json!([2048]));
}

#[test]
fn unenrolled_account_scores_zero() {
    let f = fixture();
    f.store.upsert_user(account("bob", "pw", "TX002")).unwrap();

    let result = f.verification.verify_face(&face(RED), "bob", "pw").unwrap();
    assert_eq!((result.matched, result.similarity), (false, 0.0));
    assert_eq!(result.rejection, Some(Rejection::NotEnrolled));

    let unknown = f.verification.verify_face(&face(RED), "nobody", "pw").unwrap();
    assert_eq!((unknown.matched, unknown.similarity), (false, 0.0));
    assert_eq!(unknown.rejection, Some(Rejection::UnknownAccount));
}

#[test]
fn re_registration_overwrites_the_face() {
    let f = fixture();
    f.registration
        .register(&face(RED), account("alice", "pw123", "TX001"))
        .unwrap();
    f.registration.re_enroll(&face(GREEN), "alice", "pw123").unwrap();

    assert_eq!(f.store.list_users().unwrap().len(), 1);
    let green = f.verification.verify_face(&face(GREEN), "alice", "pw123").unwrap();
    let red = f.verification.verify_face(&face(RED), "alice", "pw123").unwrap();
    assert!(green.matched);
    assert!(!red.matched);
}

#[test]
fn re_enroll_requires_the_account_password() {
    let f = fixture();
    f.registration
        .register(&face(RED), account("alice", "pw123", "TX001"))
        .unwrap();

    let failure = f.registration.re_enroll(&face(GREEN), "alice", "nope").unwrap_err();
    assert_eq!(failure.stage, RegistrationStage::Start);
}

#[test]
fn registration_without_a_face_writes_nothing() {
    let f = fixture();
    let failure = f
        .registration
        .register(&empty_frame(), account("alice", "pw123", "TX001"))
        .unwrap_err();

    assert_eq!(failure.stage, RegistrationStage::Detect);
    assert_eq!(failure.kind(), ErrorKind::NoFaceFound);
    assert!(failure.kind().auto_rearm());
    assert!(!f.store.path().exists());
}

#[test]
fn extraction_failure_is_reported_at_its_stage() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(AccountStore::new(tmp.path().join("accounts.json")));
    let service = Arc::new(FaceService::with_backends(
        Arc::new(CentreDetector),
        Arc::new(BrokenExtractor),
        MatchSettings::default(),
    ));
    let flow = RegistrationFlow::new(service, Arc::clone(&store));

    let failure = flow
        .register(&face(RED), account("alice", "pw123", "TX001"))
        .unwrap_err();
    assert_eq!(failure.stage, RegistrationStage::Extract);
    assert!(matches!(failure.error, FaceAuthError::EmbeddingExtraction));
    assert!(store.list_users().unwrap().is_empty());
}

#[test]
fn unwritable_store_fails_at_persist() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("not_a_dir");
    std::fs::write(&blocker, b"regular file").unwrap();
    let store = Arc::new(AccountStore::new(blocker.join("accounts.json")));
    let flow = RegistrationFlow::new(service(), store);

    let failure = flow
        .register(&face(RED), account("alice", "pw123", "TX001"))
        .unwrap_err();
    assert_eq!(failure.stage, RegistrationStage::Persist);
    assert_eq!(failure.kind(), ErrorKind::Storage);
    assert!(!failure.kind().auto_rearm());
}

#[test]
fn verify_without_a_face_is_a_recoverable_error() {
    let f = fixture();
    f.registration
        .register(&face(RED), account("alice", "pw123", "TX001"))
        .unwrap();

    let err = f
        .verification
        .verify_face(&empty_frame(), "alice", "pw123")
        .unwrap_err();
    assert!(err.kind().auto_rearm());
}

#[test]
fn identify_finds_the_matching_account() {
    let f = fixture();
    f.registration
        .register(&face(RED), account("alice", "pw123", "TX001"))
        .unwrap();
    f.registration
        .register(&face(GREEN), account("bob", "hunter2", "TX002"))
        .unwrap();
    f.store.upsert_user(account("carol", "pw", "TX003")).unwrap();

    let found = f.verification.identify_face(&face(GREEN)).unwrap().unwrap();
    assert_eq!(found.account.username, "bob");
    assert!(found.similarity > 0.9);

    assert!(f
        .verification
        .identify_face(&face([0, 0, 220]))
        .unwrap()
        .is_none());
}

#[test]
fn identify_skips_records_it_cannot_read() {
    let f = fixture();
    f.registration
        .register(&face(RED), account("alice", "pw123", "TX001"))
        .unwrap();
    f.registration
        .register(&face(RED), account("dave", "pw456", "TX002"))
        .unwrap();
    f.registration
        .register(&face(GREEN), account("bob", "hunter2", "TX003"))
        .unwrap();

    // Garbage ciphertext for alice, a password that no longer matches the
    // key for dave.
    let mut alice = f.store.find_user("alice").unwrap().unwrap();
    if let Some(face_data) = alice.face_data.as_mut() {
        face_data.embedding_encrypted = "!!not base64".to_string();
    }
    f.store.upsert_user(alice).unwrap();
    let mut dave = f.store.find_user("dave").unwrap().unwrap();
    dave.password = "changed".to_string();
    f.store.upsert_user(dave).unwrap();

    let found = f.verification.identify_face(&face(GREEN)).unwrap().unwrap();
    assert_eq!(found.account.username, "bob");
    assert!(f.verification.identify_face(&face(RED)).unwrap().is_none());
}

#[test]
fn identify_stops_at_the_first_high_confidence_match() {
    let f = fixture();
    f.registration
        .register(&face([220, 0, 0]), account("alice", "pw1", "TX001"))
        .unwrap();
    f.registration
        .register(&face([220, 10, 0]), account("twin", "pw2", "TX002"))
        .unwrap();
    let probe = face([220, 8, 0]);

    // Both score above the cutoff; the scan ends at the first.
    let early = f.verification.identify_face(&probe).unwrap().unwrap();
    assert_eq!(early.account.username, "alice");

    // Without the cutoff the closer twin wins.
    let mut settings = f.service.settings();
    settings.high_confidence_cutoff = 1.0;
    f.service.update_settings(settings).unwrap();
    let full = f.verification.identify_face(&probe).unwrap().unwrap();
    assert_eq!(full.account.username, "twin");
    assert!(full.similarity > early.similarity);
}

#[test]
fn raising_the_threshold_turns_a_match_into_a_rejection() {
    let f = fixture();
    f.registration
        .register(&face(RED), account("alice", "pw123", "TX001"))
        .unwrap();
    let probe = face([220, 60, 0]);

    let loose = f.verification.verify_face(&probe, "alice", "pw123").unwrap();
    assert!(loose.matched);

    let mut settings = f.service.settings();
    settings.cosine_threshold = 0.999;
    f.service.update_settings(settings).unwrap();
    let strict = f.verification.verify_face(&probe, "alice", "pw123").unwrap();
    assert!(!strict.matched);
    assert_eq!(strict.similarity, loose.similarity);
}
