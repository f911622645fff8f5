//! Credential vault.
//!
//! # Responsibilities
//! - Reversible encryption of token plaintext for at-rest storage
//! - One-way keyed digest of token plaintext for duplicate detection
//!
//! # Design Decisions
//! - AES-256-GCM with a random 96-bit nonce prefixed to the ciphertext
//! - HMAC-SHA256 over the same process-wide secret for the digest
//! - The raw secret never leaves this module

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const NONCE_SIZE: usize = 12;

/// Errors produced by vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The vault secret is absent or malformed. Fatal at startup.
    #[error("vault misconfigured: {0}")]
    Configuration(String),

    /// A stored ciphertext was not produced by this vault's key
    /// (tampering, wrong key, truncation).
    #[error("stored ciphertext failed to decrypt")]
    Corruption,
}

/// Encrypts, decrypts and digests credential plaintext.
pub struct TokenVault {
    cipher: Aes256Gcm,
    mac: HmacSha256,
}

impl TokenVault {
    /// Build a vault from the process-wide 32-byte secret.
    ///
    /// Both primitives are keyed here, once; a bad secret surfaces at
    /// startup rather than on the first encrypt.
    pub fn new(secret: [u8; 32]) -> Result<Self, VaultError> {
        let cipher = Aes256Gcm::new_from_slice(&secret)
            .map_err(|e| VaultError::Configuration(format!("invalid key: {e:?}")))?;
        // Qualified: both `KeyInit` and `Mac` offer `new_from_slice` here.
        let mac = <HmacSha256 as Mac>::new_from_slice(&secret)
            .map_err(|e| VaultError::Configuration(format!("invalid mac key: {e:?}")))?;

        Ok(Self { cipher, mac })
    }

    /// Encrypt a token's plaintext. Output is nonce || ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Configuration(format!("encryption failed: {e:?}")))?;

        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.append(&mut ciphertext);
        Ok(output)
    }

    /// Decrypt a stored ciphertext back to plaintext.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<String, VaultError> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(VaultError::Corruption);
        }

        let (nonce_bytes, payload) = ciphertext.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, payload)
            .map_err(|_| VaultError::Corruption)?;

        String::from_utf8(plaintext).map_err(|_| VaultError::Corruption)
    }

    /// Keyed one-way digest of a token's plaintext, as lowercase hex.
    ///
    /// Deterministic under a given secret; used only as a uniqueness key.
    pub fn digest(&self, plaintext: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(plaintext.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
