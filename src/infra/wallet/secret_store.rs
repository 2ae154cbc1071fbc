//! AES-256-GCM encryption of child private keys at rest.
//!
//! Envelope format: `base64(nonce[12] || ciphertext || tag[16])`. The key is
//! SHA-256 of the operator secret. Rotating the secret makes every stored
//! envelope undecryptable; decryption then yields an empty key and sweeps for
//! those users fail until keys are re-encrypted.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::{AppError, ConfigError, WalletError};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Symmetric store for per-user private keys
pub struct SecretStore {
    cipher: Aes256Gcm,
}

impl SecretStore {
    /// Create a store keyed by the operator secret
    pub fn new(secret: &SecretString) -> Result<Self, AppError> {
        if secret.expose_secret().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "ENCRYPTION_KEY".to_string(),
                message: "must not be empty".to_string(),
            }
            .into());
        }

        let key = Sha256::digest(secret.expose_secret().as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| WalletError::Encryption(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt a secret. Empty input encrypts to an empty envelope.
    pub fn encrypt(&self, plaintext: &SecretString) -> Result<String, AppError> {
        let plaintext = plaintext.expose_secret();
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| WalletError::Encryption(e.to_string()))?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(envelope))
    }

    /// Decrypt an envelope.
    ///
    /// Never fails: empty, malformed or unauthenticated input yields an empty
    /// secret. Callers must treat an empty result as "no key" and not sign.
    #[must_use]
    pub fn decrypt(&self, envelope: &str) -> SecretString {
        let envelope = envelope.trim();
        if envelope.is_empty() || envelope == "null" {
            return SecretString::from(String::new());
        }

        let Ok(bytes) = STANDARD.decode(envelope) else {
            debug!("Key envelope is not valid base64");
            return SecretString::from(String::new());
        };
        if bytes.len() < NONCE_LEN + TAG_LEN {
            debug!(len = bytes.len(), "Key envelope too short");
            return SecretString::from(String::new());
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = match self.cipher.decrypt(Nonce::from_slice(nonce), ciphertext) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                debug!("Key envelope failed authentication");
                return SecretString::from(String::new());
            }
        };

        SecretString::from(String::from_utf8(plaintext).unwrap_or_default())
    }
}
