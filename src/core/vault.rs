//! Password-derived encryption for biometric payloads at rest.
//!
//! PBKDF2-HMAC-SHA1 stretches the account password into an AES-256 key, the
//! same derivation the existing account documents were written with;
//! payloads are encrypted with AES-256-CBC and PKCS#7 padding. CBC gives
//! confidentiality only, so a wrong password and a damaged payload are
//! reported as the same failure.

use aes::Aes256;
use base64::{engine::general_purpose, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::Hmac;
use pbkdf2::pbkdf2;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use crate::common::{FaceAuthError, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const MIN_KDF_ITERATIONS: u32 = 100_000;
const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// Ciphertext plus everything except the password needed to decrypt it.
/// Binary fields are base64 (standard alphabet, padded).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub salt: String,
    pub iv: String,
    /// Dimensions of the plaintext; their product is the plaintext length.
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Vault {
    iterations: u32,
}

impl Default for Vault {
    fn default() -> Self {
        Self::new()
    }
}

impl Vault {
    pub fn new() -> Self {
        Self {
            iterations: MIN_KDF_ITERATIONS,
        }
    }

    /// Iteration counts below the floor are raised to it.
    pub fn with_iterations(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(MIN_KDF_ITERATIONS),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Encrypts a flat byte buffer, recording its length as a 1-D shape.
    pub fn encrypt_bytes(&self, plaintext: &[u8], password: &str) -> Result<EncryptedPayload> {
        self.encrypt(plaintext, &[plaintext.len()], password)
    }

    pub fn encrypt(&self, plaintext: &[u8], shape: &[usize], password: &str) -> Result<EncryptedPayload> {
        match element_count(shape) {
            Some(count) if count == plaintext.len() => {}
            _ => {
                return Err(FaceAuthError::Other(anyhow::anyhow!(
                    "shape {:?} does not describe a {}-byte payload",
                    shape,
                    plaintext.len()
                )))
            }
        }

        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let mut key = self.derive_key(password, &salt)?;
        let cipher = Aes256CbcEnc::new_from_slices(&key, &iv);
        key.fill(0);
        let cipher = cipher
            .map_err(|e| FaceAuthError::Other(anyhow::anyhow!("cipher init failed: {}", e)))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        Ok(EncryptedPayload {
            ciphertext: general_purpose::STANDARD.encode(ciphertext),
            salt: general_purpose::STANDARD.encode(salt),
            iv: general_purpose::STANDARD.encode(iv),
            shape: shape.to_vec(),
        })
    }

    /// Any decoding, padding or shape problem collapses into
    /// `WrongPasswordOrCorruptData`.
    pub fn decrypt(&self, payload: &EncryptedPayload, password: &str) -> Result<Vec<u8>> {
        let ciphertext = decode_field(&payload.ciphertext)?;
        let salt = decode_field(&payload.salt)?;
        let iv = decode_field(&payload.iv)?;

        if salt.is_empty()
            || iv.len() != IV_LEN
            || ciphertext.is_empty()
            || ciphertext.len() % BLOCK_LEN != 0
        {
            return Err(FaceAuthError::WrongPasswordOrCorruptData);
        }

        let mut key = self.derive_key(password, &salt)?;
        let cipher = Aes256CbcDec::new_from_slices(&key, &iv);
        key.fill(0);
        let plaintext = cipher
            .map_err(|_| FaceAuthError::WrongPasswordOrCorruptData)?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| FaceAuthError::WrongPasswordOrCorruptData)?;

        match element_count(&payload.shape) {
            Some(count) if count == plaintext.len() => Ok(plaintext),
            _ => Err(FaceAuthError::WrongPasswordOrCorruptData),
        }
    }

    fn derive_key(&self, password: &str, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::<Hmac<Sha1>>(password.as_bytes(), salt, self.iterations, &mut key)
            .map_err(|e| FaceAuthError::Other(anyhow::anyhow!("key derivation failed: {}", e)))?;
        Ok(key)
    }
}

fn decode_field(value: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|_| FaceAuthError::WrongPasswordOrCorruptData)
}

fn element_count(shape: &[usize]) -> Option<usize> {
    if shape.is_empty() {
        return None;
    }
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}
