use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::Error;

/// Nonce length for AES-256-GCM
const NONCE_LEN: usize = 12;

/// Authenticated encryption of camera secrets at rest.
///
/// Ciphertexts are self-contained: base64 over `nonce || ciphertext || tag`
/// with a fresh random nonce per seal. Tampering fails authentication and
/// surfaces as a crypto error, distinct from a missing secret.
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// Build from a raw 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(Error::Config(format!(
                "ENC_KEY must be exactly 32 bytes, got {}",
                key.len()
            ))
            .into());
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::Crypto(format!("invalid vault key: {}", e)))?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| Error::Crypto(format!("seal failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    pub fn open(&self, sealed: &str) -> Result<String> {
        let raw = BASE64
            .decode(sealed)
            .map_err(|e| Error::Crypto(format!("ciphertext is not valid base64: {}", e)))?;
        if raw.len() <= NONCE_LEN {
            return Err(Error::Crypto("ciphertext too short".into()).into());
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Crypto("ciphertext failed authentication".into()))?;

        String::from_utf8(plaintext)
            .map_err(|e| Error::Crypto(format!("plaintext is not UTF-8: {}", e)).into())
    }
}
