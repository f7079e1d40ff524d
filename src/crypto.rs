//! Credential encryption using AES-256-GCM
//!
//! Blobs are laid out as `nonce(12) || tag(16) || ciphertext`. Every call to
//! [`encrypt_bytes`] draws a fresh random nonce. Associated data binds a blob
//! to the record it was written for.
//!
//! All decryption failures collapse into [`CryptoError::DecryptionFailed`],
//! whose message is fixed and never includes key, plaintext or ciphertext
//! bytes.

#![allow(deprecated)]

use std::collections::BTreeMap;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{AppConfig, ENCRYPTION_KEY_HEX_LEN};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const MIN_ENCRYPTED_LEN: usize = NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid encryption key: expected {ENCRYPTION_KEY_HEX_LEN} hex characters")]
    InvalidKey,
    #[error("no encryption key configured")]
    MissingKey,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            let mut bytes = bytes;
            bytes.zeroize();
            return Err(CryptoError::InvalidKey);
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Parse a key from exactly 64 hex characters
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        if hex_key.len() != ENCRYPTION_KEY_HEX_LEN {
            return Err(CryptoError::InvalidKey);
        }
        let bytes = hex::decode(hex_key).map_err(|_| CryptoError::InvalidKey)?;
        Self::new(bytes)
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt bytes using AES-256-GCM, returning `nonce || tag || ciphertext`
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    // aes-gcm appends the tag after the ciphertext
    let sealed = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut result = Vec::with_capacity(NONCE_LEN + sealed.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(tag);
    result.extend_from_slice(ciphertext);

    Ok(result)
}

/// Decrypt a `nonce || tag || ciphertext` blob using AES-256-GCM
pub fn decrypt_bytes(key: &CryptoKey, aad: &[u8], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::DecryptionFailed);
    }

    let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);
    let tag = &blob[NONCE_LEN..MIN_ENCRYPTED_LEN];
    let ciphertext = &blob[MIN_ENCRYPTED_LEN..];

    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &sealed,
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Versioned set of encryption keys.
///
/// Encryption always uses the active version. Decryption tries the version a
/// blob was tagged with first, then every other known key.
#[derive(Debug, Clone)]
pub struct KeyRing {
    active_version: i32,
    keys: BTreeMap<i32, CryptoKey>,
}

impl KeyRing {
    pub fn new(active_version: i32, active_key: CryptoKey) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(active_version, active_key);
        Self {
            active_version,
            keys,
        }
    }

    /// Add a retired key that remains valid for decryption.
    pub fn with_previous(mut self, version: i32, key: CryptoKey) -> Self {
        if version != self.active_version {
            self.keys.insert(version, key);
        }
        self
    }

    /// Build the key ring from configuration. Fails when the active key is
    /// absent or malformed.
    pub fn from_config(config: &AppConfig) -> Result<Self, CryptoError> {
        let active = config
            .encryption_key
            .as_deref()
            .ok_or(CryptoError::MissingKey)?;
        let mut ring = Self::new(config.encryption_key_version, CryptoKey::from_hex(active)?);
        for (version, key) in &config.previous_encryption_keys {
            ring = ring.with_previous(*version, CryptoKey::from_hex(key)?);
        }
        Ok(ring)
    }

    pub fn active_version(&self) -> i32 {
        self.active_version
    }

    pub fn versions(&self) -> impl Iterator<Item = i32> + '_ {
        self.keys.keys().copied()
    }

    pub fn encrypt(&self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self
            .keys
            .get(&self.active_version)
            .ok_or(CryptoError::MissingKey)?;
        encrypt_bytes(key, aad, plaintext)
    }

    pub fn decrypt(
        &self,
        tagged_version: i32,
        aad: &[u8],
        blob: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if let Some(key) = self.keys.get(&tagged_version)
            && let Ok(plaintext) = decrypt_bytes(key, aad, blob)
        {
            return Ok(plaintext);
        }

        self.keys
            .iter()
            .filter(|(version, _)| **version != tagged_version)
            .find_map(|(_, key)| decrypt_bytes(key, aad, blob).ok())
            .ok_or(CryptoError::DecryptionFailed)
    }
}
