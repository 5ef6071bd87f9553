//! Credential encryption at rest
//!
//! Peer authenticators (`username:password`) are stored encrypted with
//! ChaCha20-Poly1305 under a process-wide key derived from the operator's
//! key file. The plaintext exists only transiently: decrypted when an
//! outbound request needs its Authorization header and dropped with the
//! request.
//!
//! Blob layout: `base64(nonce || ciphertext)`, nonce 12 bytes.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};
use sha2::{Digest, Sha256};

use crate::PeerError;

/// Nonce width of ChaCha20-Poly1305
const NONCE_LEN: usize = 12;

/// Process-wide symmetric cipher for peer authenticators
pub struct CredentialCipher {
    cipher: ChaCha20Poly1305,
}

impl CredentialCipher {
    /// Derives the key from the raw bytes of the operator's key file
    ///
    /// The file content is hashed (SHA-256) down to the 32-byte key, so any
    /// file the operator can keep secret works; no format is imposed.
    pub fn from_key_file(path: &Path) -> Result<Self, PeerError> {
        let raw = std::fs::read(path).map_err(|e| {
            PeerError::Credential(format!(
                "cannot read encryption key file {}: {e}",
                path.display()
            ))
        })?;
        if raw.is_empty() {
            return Err(PeerError::Credential(format!(
                "encryption key file {} is empty",
                path.display()
            )));
        }
        Ok(Self::from_key_bytes(&raw))
    }

    /// Derives the key from raw bytes (tests, embedded deployments)
    pub fn from_key_bytes(raw: &[u8]) -> Self {
        let digest = Sha256::digest(raw);
        let key = Key::from_slice(&digest);
        Self {
            cipher: ChaCha20Poly1305::new(key),
        }
    }

    /// Encrypts a plaintext authenticator into the storable blob
    pub fn encrypt(&self, plaintext: &str) -> Result<String, PeerError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| PeerError::Credential("encryption failed".to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypts a stored blob back into the plaintext authenticator
    pub fn decrypt(&self, blob: &str) -> Result<String, PeerError> {
        let raw = BASE64
            .decode(blob)
            .map_err(|e| PeerError::Credential(format!("authenticator blob is not base64: {e}")))?;
        if raw.len() <= NONCE_LEN {
            return Err(PeerError::Credential(
                "authenticator blob is truncated".to_string(),
            ));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| PeerError::Credential("authenticator decryption failed".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| PeerError::Credential("authenticator is not UTF-8".to_string()))
    }

    /// Splits a plaintext authenticator into (username, password)
    pub fn split_authenticator(plaintext: &str) -> Result<(&str, &str), PeerError> {
        plaintext.split_once(':').ok_or_else(|| {
            PeerError::Credential("authenticator is not of the form user:password".to_string())
        })
    }
}
