//! Authenticated encryption for peer-link payloads.
//!
//! A single shared secret controls the whole relay plane: SHA-256 of the
//! UTF-8 secret becomes the AES-256-GCM key. An empty secret disables
//! encryption entirely and both operations become the identity, so two
//! nodes only interoperate when they agree on the secret.
//!
//! This module is pure CPU — it never observes the shutdown signal.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// AES-GCM standard nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Seals and opens serialized discovery payloads.
///
/// Built once at startup and shared immutably across every link task.
pub struct PayloadCipher {
    aead: Option<Aes256Gcm>,
}

impl PayloadCipher {
    /// Derive the cipher from the configured secret. Empty secret means
    /// encryption is disabled.
    pub fn new(secret: &str) -> Result<Self, CipherError> {
        if secret.is_empty() {
            return Ok(Self { aead: None });
        }
        let key = Sha256::digest(secret.as_bytes());
        let aead = Aes256Gcm::new_from_slice(&key).map_err(|_| CipherError::InvalidKey)?;
        Ok(Self { aead: Some(aead) })
    }

    /// Whether a secret is configured.
    pub fn is_enabled(&self) -> bool {
        self.aead.is_some()
    }

    /// Seal a payload. Output layout: `nonce || ciphertext_and_tag`.
    /// A fresh random nonce is drawn for every call.
    pub fn encrypt(&self, payload: &[u8]) -> Result<Vec<u8>, CipherError> {
        let Some(aead) = &self.aead else {
            return Ok(payload.to_vec());
        };
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = aead
            .encrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|_| CipherError::AuthFailed)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open a sealed payload. Rejects inputs shorter than the nonce and
    /// any ciphertext whose tag does not verify.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        let Some(aead) = &self.aead else {
            return Ok(data.to_vec());
        };
        if data.len() < NONCE_LEN {
            return Err(CipherError::InputTooShort);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        aead.decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::AuthFailed)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("ciphertext shorter than the nonce")]
    InputTooShort,

    #[error("payload authentication failed")]
    AuthFailed,

    #[error("derived key has the wrong length — this is a bug")]
    InvalidKey,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
