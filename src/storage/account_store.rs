//! The accounts document: `{"admin_accounts": [...], "user_accounts": [...]}`.
//!
//! Every mutation reads the whole document, changes it in memory and writes
//! the whole document back through a temp file and rename, so a failed
//! write leaves the previous file untouched.

use crate::common::{FaceAuthError, Result};
use crate::core::vault::EncryptedPayload;
use crate::core::recognizer::EMBEDDING_BYTES;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

const DRIVER_ID_PREFIX: &str = "TX";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountDocument {
    /// Administrator records are never interpreted here, only carried along.
    #[serde(default)]
    pub admin_accounts: Vec<Value>,
    #[serde(default)]
    pub user_accounts: Vec<AccountRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub username: String,
    /// Stored in plaintext; face-only login decrypts with it.
    pub password: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub driver_id: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default = "default_plan")]
    pub plan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_data: Option<FaceData>,
    /// Fields written by other parts of the application.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_plan() -> String {
    "Normal".to_string()
}

impl AccountRecord {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
        phone: impl Into<String>,
        driver_id: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            name: name.into(),
            driver_id: driver_id.into(),
            phone: phone.into(),
            plan: default_plan(),
            face_data: None,
            extra: Map::new(),
        }
    }

    /// Enrolled means a complete `face_data` block is present.
    pub fn is_enrolled(&self) -> bool {
        self.face_data.as_ref().map_or(false, FaceData::is_complete)
    }
}

/// Encrypted biometric block, persisted in the flat field layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceData {
    #[serde(default)]
    pub encrypted_image: String,
    #[serde(default)]
    pub salt: String,
    #[serde(default)]
    pub iv: String,
    #[serde(default)]
    pub shape: Vec<usize>,
    #[serde(default)]
    pub embedding_encrypted: String,
    #[serde(default)]
    pub embedding_salt: String,
    #[serde(default)]
    pub embedding_iv: String,
    #[serde(default = "default_embedding_shape")]
    pub embedding_shape: Vec<usize>,
    #[serde(default)]
    pub registered_at: String,
    #[serde(default)]
    pub model: String,
}

fn default_embedding_shape() -> Vec<usize> {
    vec![EMBEDDING_BYTES]
}

impl FaceData {
    pub fn new(image: EncryptedPayload, embedding: EncryptedPayload, model: impl Into<String>) -> Self {
        Self {
            encrypted_image: image.ciphertext,
            salt: image.salt,
            iv: image.iv,
            shape: image.shape,
            embedding_encrypted: embedding.ciphertext,
            embedding_salt: embedding.salt,
            embedding_iv: embedding.iv,
            embedding_shape: embedding.shape,
            registered_at: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            model: model.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.embedding_encrypted.is_empty()
            && !self.embedding_salt.is_empty()
            && !self.embedding_iv.is_empty()
    }

    pub fn image_payload(&self) -> EncryptedPayload {
        EncryptedPayload {
            ciphertext: self.encrypted_image.clone(),
            salt: self.salt.clone(),
            iv: self.iv.clone(),
            shape: self.shape.clone(),
        }
    }

    pub fn embedding_payload(&self) -> EncryptedPayload {
        EncryptedPayload {
            ciphertext: self.embedding_encrypted.clone(),
            salt: self.embedding_salt.clone(),
            iv: self.embedding_iv.clone(),
            shape: self.embedding_shape.clone(),
        }
    }
}

/// File-backed account store. One instance per process is the only writer.
pub struct AccountStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AccountStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file reads as an empty document.
    pub fn load(&self) -> Result<AccountDocument> {
        if !self.path.exists() {
            tracing::debug!("Account store {} does not exist yet", self.path.display());
            return Ok(AccountDocument::default());
        }
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| FaceAuthError::Storage(format!("Failed to read {}: {}", self.path.display(), e)))?;
        if contents.trim().is_empty() {
            return Ok(AccountDocument::default());
        }
        serde_json::from_str(&contents)
            .map_err(|e| FaceAuthError::Storage(format!("Failed to parse {}: {}", self.path.display(), e)))
    }

    pub fn list_users(&self) -> Result<Vec<AccountRecord>> {
        Ok(self.load()?.user_accounts)
    }

    pub fn find_user(&self, username: &str) -> Result<Option<AccountRecord>> {
        Ok(self
            .load()?
            .user_accounts
            .into_iter()
            .find(|a| a.username == username))
    }

    pub fn get_user(&self, username: &str) -> Result<AccountRecord> {
        self.find_user(username)?
            .ok_or_else(|| FaceAuthError::AccountNotFound(username.to_string()))
    }

    /// Accounts with a usable biometric block, in document order.
    pub fn enrolled_users(&self) -> Result<Vec<AccountRecord>> {
        Ok(self
            .list_users()?
            .into_iter()
            .filter(AccountRecord::is_enrolled)
            .collect())
    }

    /// Password login.
    pub fn authenticate_password(&self, username: &str, password: &str) -> Result<Option<AccountRecord>> {
        let account = self
            .find_user(username)?
            .filter(|a| a.password == password);
        if account.is_none() {
            tracing::info!("Password login rejected for {}", username);
        }
        Ok(account)
    }

    pub fn ensure_username_available(&self, username: &str) -> Result<()> {
        if self.find_user(username)?.is_some() {
            return Err(FaceAuthError::UsernameTaken(username.to_string()));
        }
        Ok(())
    }

    /// `TX` followed by one more than the largest numeric suffix in use.
    pub fn next_driver_id(&self) -> Result<String> {
        Ok(next_driver_id_from(&self.list_users()?))
    }

    /// Inserts or replaces the record with the same username.
    pub fn upsert_user(&self, account: AccountRecord) -> Result<()> {
        let username = account.username.clone();
        self.modify(|doc| {
            match doc.user_accounts.iter_mut().find(|a| a.username == account.username) {
                Some(existing) => {
                    // Keep fields this record type does not model.
                    let mut merged = account;
                    for (key, value) in std::mem::take(&mut existing.extra) {
                        merged.extra.entry(key).or_insert(value);
                    }
                    *existing = merged;
                }
                None => doc.user_accounts.push(account),
            }
            Ok(())
        })?;
        tracing::info!("Saved account {}", username);
        Ok(())
    }

    pub fn delete_user(&self, username: &str) -> Result<()> {
        self.modify(|doc| {
            let before = doc.user_accounts.len();
            doc.user_accounts.retain(|a| a.username != username);
            if doc.user_accounts.len() == before {
                return Err(FaceAuthError::AccountNotFound(username.to_string()));
            }
            Ok(())
        })?;
        tracing::info!("Deleted account {}", username);
        Ok(())
    }

    fn modify<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut AccountDocument) -> Result<()>,
    {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut doc = self.load()?;
        mutate(&mut doc)?;
        self.write(&doc)
    }

    fn write(&self, doc: &AccountDocument) -> Result<()> {
        let storage_err =
            |e: std::io::Error| FaceAuthError::Storage(format!("Failed to write {}: {}", self.path.display(), e));

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(storage_err)?;

        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| FaceAuthError::Storage(format!("Failed to serialize accounts: {}", e)))?;

        let mut tmp = NamedTempFile::new_in(&parent).map_err(storage_err)?;
        tmp.write_all(json.as_bytes()).map_err(storage_err)?;
        tmp.as_file().sync_all().map_err(storage_err)?;
        tmp.persist(&self.path).map_err(|e| storage_err(e.error))?;
        Ok(())
    }
}

fn next_driver_id_from(accounts: &[AccountRecord]) -> String {
    let next = accounts
        .iter()
        .filter_map(|a| a.driver_id.strip_prefix(DRIVER_ID_PREFIX))
        .filter_map(|digits| digits.parse::<u32>().ok())
        .max()
        .map_or(1, |max| max + 1);
    format!("{}{:03}", DRIVER_ID_PREFIX, next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> AccountStore {
        AccountStore::new(tmp.path().join("accounts.json"))
    }

    fn alice() -> AccountRecord {
        AccountRecord::new("alice", "pw123", "Alice", "0900000001", "TX001")
    }

    #[test]
    fn first_write_bootstraps_the_document() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert!(store.list_users().unwrap().is_empty());

        store.upsert_user(alice()).unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["admin_accounts"], serde_json::json!([]));
        assert_eq!(raw["user_accounts"].as_array().unwrap().len(), 1);
        assert_eq!(raw["user_accounts"][0]["username"], "alice");
        assert!(raw["user_accounts"][0].get("face_data").is_none());
    }

    #[test]
    fn upsert_replaces_by_username() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.upsert_user(alice()).unwrap();

        let mut updated = alice();
        updated.phone = "0911111111".into();
        store.upsert_user(updated).unwrap();

        let users = store.list_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].phone, "0911111111");
    }

    #[test]
    fn unknown_fields_and_admins_survive_rewrites() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        fs::write(
            store.path(),
            r#"{
                "admin_accounts": [{"username": "admin", "password": "admin"}],
                "user_accounts": [
                    {"username": "bob", "password": "pw", "name": "Bob", "driver_id": "TX007",
                     "phone": "1", "plan": "Premium", "telegram_chat_id": 42, "face_data": null}
                ]
            }"#,
        )
        .unwrap();

        store.upsert_user(alice()).unwrap();
        let mut bob = store.get_user("bob").unwrap();
        assert!(!bob.is_enrolled());
        bob.extra.clear();
        bob.name = "Robert".into();
        store.upsert_user(bob).unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["admin_accounts"][0]["username"], "admin");
        assert_eq!(raw["user_accounts"][0]["telegram_chat_id"], 42);
        assert_eq!(raw["user_accounts"][0]["name"], "Robert");
        assert_eq!(raw["user_accounts"][0]["plan"], "Premium");
    }

    #[test]
    fn face_data_uses_flat_layout_and_defaults_embedding_shape() {
        let json = r#"{
            "encrypted_image": "aW1n", "salt": "c2FsdA==", "iv": "aXY=", "shape": [2, 2, 3],
            "embedding_encrypted": "ZW1i", "embedding_salt": "ZXM=", "embedding_iv": "ZWk=",
            "registered_at": "2025-01-01T10:00:00", "model": "ArcFace"
        }"#;
        let face: FaceData = serde_json::from_str(json).unwrap();
        assert!(face.is_complete());
        assert_eq!(face.embedding_shape, vec![2048]);
        assert_eq!(face.image_payload().shape, vec![2, 2, 3]);
        assert_eq!(face.embedding_payload().ciphertext, "ZW1i");
    }

    #[test]
    fn password_login_and_username_checks() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.upsert_user(alice()).unwrap();

        assert!(store.authenticate_password("alice", "pw123").unwrap().is_some());
        assert!(store.authenticate_password("alice", "nope").unwrap().is_none());
        assert!(store.authenticate_password("carol", "pw123").unwrap().is_none());

        assert!(matches!(
            store.ensure_username_available("alice"),
            Err(FaceAuthError::UsernameTaken(_))
        ));
        assert!(store.ensure_username_available("carol").is_ok());
    }

    #[test]
    fn driver_ids_continue_from_the_largest() {
        assert_eq!(next_driver_id_from(&[]), "TX001");

        let mut accounts = vec![alice()];
        accounts.push(AccountRecord::new("b", "p", "B", "", "TX009"));
        accounts.push(AccountRecord::new("c", "p", "C", "", "legacy"));
        accounts.push(AccountRecord::new("d", "p", "D", "", "TX003"));
        assert_eq!(next_driver_id_from(&accounts), "TX010");
    }

    #[test]
    fn delete_removes_the_record() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.upsert_user(alice()).unwrap();

        store.delete_user("alice").unwrap();
        assert!(store.find_user("alice").unwrap().is_none());
        assert!(matches!(
            store.delete_user("alice"),
            Err(FaceAuthError::AccountNotFound(_))
        ));
    }

    #[test]
    fn corrupt_document_is_a_storage_error() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        fs::write(store.path(), "{ not json").unwrap();

        assert!(matches!(store.load(), Err(FaceAuthError::Storage(_))));
        assert!(matches!(store.upsert_user(alice()), Err(FaceAuthError::Storage(_))));
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "{ not json");
    }
}
