//! ChaCha20-Poly1305 token encryption with a PBKDF2-derived key

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use sha2::Sha256;

use crate::error::{Result, StreamTagsError};

/// Nonce size for ChaCha20-Poly1305 (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Key size for ChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Fixed salt for key derivation. The secret is the only per-deployment
/// input, so changing this invalidates every stored record.
pub const KDF_SALT: &[u8] = b"streamtags/credential-store/v1";

/// PBKDF2-HMAC-SHA256 rounds used when the configuration does not override it.
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

/// Ciphertext (with authentication tag appended) and the nonce it was
/// sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; NONCE_SIZE],
}

/// Generate a random nonce for encryption.
pub fn generate_iv() -> [u8; NONCE_SIZE] {
    let mut iv = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut iv);
    iv
}

/// Authenticated cipher keyed from a configured secret.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: ChaCha20Poly1305,
}

impl TokenCipher {
    /// Derives the key from `secret` with [`DEFAULT_KDF_ITERATIONS`].
    pub fn derive(secret: &str) -> Result<Self> {
        Self::derive_with_iterations(secret, DEFAULT_KDF_ITERATIONS)
    }

    /// Derives the key from `secret` with PBKDF2-HMAC-SHA256.
    ///
    /// # Errors
    ///
    /// Returns [`StreamTagsError::Encryption`] for an empty secret or zero
    /// iterations.
    pub fn derive_with_iterations(secret: &str, iterations: u32) -> Result<Self> {
        if secret.is_empty() {
            return Err(StreamTagsError::Encryption("Encryption secret is empty".into()).into());
        }
        if iterations == 0 {
            return Err(
                StreamTagsError::Encryption("KDF iterations must be positive".into()).into(),
            );
        }

        let mut key = [0u8; KEY_SIZE];
        pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), KDF_SALT, iterations, &mut key);
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| StreamTagsError::Encryption(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<Sealed> {
        let iv = generate_iv();
        let ciphertext = self.encrypt_with(plaintext.as_bytes(), &iv, b"")?;
        Ok(Sealed { ciphertext, iv })
    }

    /// Decrypts a value produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Any failure (wrong key, tampered bytes, bad nonce length, non-UTF-8
    /// plaintext) is [`StreamTagsError::DecryptionFailed`].
    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8]) -> Result<String> {
        let plaintext = self.decrypt_with(ciphertext, iv, b"")?;
        String::from_utf8(plaintext).map_err(|_| StreamTagsError::DecryptionFailed.into())
    }

    /// Encrypts with an explicit nonce and associated data.
    ///
    /// The caller guarantees the nonce is never reused with this key.
    pub(crate) fn encrypt_with(&self, plaintext: &[u8], iv: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if iv.len() != NONCE_SIZE {
            return Err(StreamTagsError::Encryption(format!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                iv.len()
            ))
            .into());
        }
        self.cipher
            .encrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| StreamTagsError::Encryption(e.to_string()).into())
    }

    pub(crate) fn decrypt_with(&self, ciphertext: &[u8], iv: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if iv.len() != NONCE_SIZE {
            return Err(StreamTagsError::DecryptionFailed.into());
        }
        self.cipher
            .decrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| StreamTagsError::DecryptionFailed.into())
    }
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenCipher { .. }")
    }
}
