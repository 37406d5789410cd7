//! Encrypted credential record on disk
//!
//! The record is a small JSON document:
//!
//! ```json
//! {
//!   "iv": "<base64, 12 bytes>",
//!   "encryptedAccessToken": "<base64>",
//!   "encryptedRefreshToken": "<base64>",
//!   "expiresAt": "2024-05-01T19:00:00Z"
//! }
//! ```
//!
//! Both tokens are sealed under nonces derived from the single record `iv`
//! (one per field), with the field name and expiry bound as associated data.
//! Swapping the two ciphertexts or editing `expiresAt` fails authentication.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credentials::cipher::{
    generate_iv, Sealed, TokenCipher, DEFAULT_KDF_ITERATIONS, NONCE_SIZE,
};
use crate::credentials::CredentialPair;
use crate::error::{Result, StreamTagsError};
use crate::persist::{write_atomic, OWNER_ONLY_MODE};

const ACCESS_FIELD: u8 = 0;
const REFRESH_FIELD: u8 = 1;

/// Persisted shape of a [`CredentialPair`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedCredentialRecord {
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub encrypted_access_token: Vec<u8>,
    #[serde(with = "b64")]
    pub encrypted_refresh_token: Vec<u8>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

fn field_nonce(iv: &[u8], field: u8) -> Vec<u8> {
    let mut nonce = iv.to_vec();
    if let Some(first) = nonce.first_mut() {
        *first ^= field;
    }
    nonce
}

fn field_aad(field: u8, expires_at: Option<DateTime<Utc>>) -> Vec<u8> {
    let name = if field == ACCESS_FIELD {
        "accessToken"
    } else {
        "refreshToken"
    };
    match expires_at {
        Some(at) => format!("{name}|{}", at.to_rfc3339()).into_bytes(),
        None => format!("{name}|").into_bytes(),
    }
}

/// Encrypted single-record credential file.
///
/// The cipher sits behind a lock so [`rotate_key`](Self::rotate_key) can
/// swap it while other tasks hold the store.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    cipher: RwLock<TokenCipher>,
    kdf_iterations: u32,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>, cipher: TokenCipher) -> Self {
        Self {
            path: path.into(),
            cipher: RwLock::new(cipher),
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }

    /// Iteration count used when a new secret is derived during rotation.
    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    pub fn kdf_iterations(&self) -> u32 {
        self.kdf_iterations
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cipher(&self) -> Result<TokenCipher> {
        self.cipher
            .read()
            .map(|c| c.clone())
            .map_err(|_| StreamTagsError::Encryption("cipher lock poisoned".into()).into())
    }

    /// Encrypts one value under a fresh nonce with the current key.
    pub fn encrypt(&self, plaintext: &str) -> Result<Sealed> {
        self.cipher()?.encrypt(plaintext)
    }

    /// Decrypts one value with the current key.
    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8]) -> Result<String> {
        self.cipher()?.decrypt(ciphertext, iv)
    }

    /// Seals `pair` into a record under a fresh record nonce.
    pub fn seal(&self, pair: &CredentialPair) -> Result<EncryptedCredentialRecord> {
        let cipher = self.cipher()?;
        let iv = generate_iv();
        let encrypted_access_token = cipher.encrypt_with(
            pair.access_token.as_bytes(),
            &field_nonce(&iv, ACCESS_FIELD),
            &field_aad(ACCESS_FIELD, pair.expires_at),
        )?;
        let encrypted_refresh_token = cipher.encrypt_with(
            pair.refresh_token.as_bytes(),
            &field_nonce(&iv, REFRESH_FIELD),
            &field_aad(REFRESH_FIELD, pair.expires_at),
        )?;
        Ok(EncryptedCredentialRecord {
            iv: iv.to_vec(),
            encrypted_access_token,
            encrypted_refresh_token,
            expires_at: pair.expires_at,
        })
    }

    /// Opens a record sealed by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// [`StreamTagsError::DecryptionFailed`] when the key is wrong or any
    /// part of the record was altered.
    pub fn open(&self, record: &EncryptedCredentialRecord) -> Result<CredentialPair> {
        if record.iv.len() != NONCE_SIZE {
            return Err(StreamTagsError::DecryptionFailed.into());
        }
        let cipher = self.cipher()?;
        let open_field = |ciphertext: &[u8], field: u8| -> Result<String> {
            let plaintext = cipher.decrypt_with(
                ciphertext,
                &field_nonce(&record.iv, field),
                &field_aad(field, record.expires_at),
            )?;
            String::from_utf8(plaintext).map_err(|_| StreamTagsError::DecryptionFailed.into())
        };
        Ok(CredentialPair {
            access_token: open_field(&record.encrypted_access_token, ACCESS_FIELD)?,
            refresh_token: open_field(&record.encrypted_refresh_token, REFRESH_FIELD)?,
            expires_at: record.expires_at,
        })
    }

    /// Writes `record` atomically with owner-only permissions.
    pub async fn save(&self, record: &EncryptedCredentialRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        write_atomic(&self.path, json.as_bytes(), Some(OWNER_ONLY_MODE)).await?;
        tracing::debug!(path = %self.path.display(), "Saved credential record");
        Ok(())
    }

    /// Reads the record, `None` when the file does not exist.
    pub async fn load(&self) -> Result<Option<EncryptedCredentialRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StreamTagsError::Io(e).into()),
        };
        let record = serde_json::from_str(&contents)?;
        Ok(Some(record))
    }

    /// Seals and saves `pair`.
    pub async fn persist(&self, pair: &CredentialPair) -> Result<()> {
        let record = self.seal(pair)?;
        self.save(&record).await
    }

    /// Loads and opens the stored pair.
    pub async fn load_pair(&self) -> Result<Option<CredentialPair>> {
        match self.load().await? {
            Some(record) => self.open(&record).map(Some),
            None => Ok(None),
        }
    }

    /// Replaces the cipher. Records written before the swap can no longer
    /// be opened; callers re-persist the live pair afterwards.
    pub fn rotate_key(&self, cipher: TokenCipher) -> Result<()> {
        let mut current = self
            .cipher
            .write()
            .map_err(|_| StreamTagsError::Encryption("cipher lock poisoned".into()))?;
        *current = cipher;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn store(dir: &TempDir, secret: &str) -> CredentialStore {
        CredentialStore::new(
            dir.path().join("credentials.json"),
            TokenCipher::derive_with_iterations(secret, 16).unwrap(),
        )
    }

    fn pair() -> CredentialPair {
        CredentialPair::new(
            "access-1",
            "refresh-1",
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap()),
        )
    }

    fn assert_decryption_failed(err: anyhow::Error) {
        assert!(
            matches!(
                err.downcast_ref::<StreamTagsError>(),
                Some(StreamTagsError::DecryptionFailed)
            ),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "k");
        let record = store.seal(&pair()).unwrap();
        assert_eq!(record.iv.len(), NONCE_SIZE);
        assert_eq!(store.open(&record).unwrap(), pair());
    }

    #[tokio::test]
    async fn test_seal_open_roundtrip_empty_and_nul() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "k");
        let odd = CredentialPair::new("", "a\0b", None);
        assert_eq!(store.open(&store.seal(&odd).unwrap()).unwrap(), odd);

        store.persist(&odd).await.unwrap();
        assert_eq!(store.load_pair().await.unwrap(), Some(odd));
    }

    #[test]
    fn test_record_json_uses_camel_case_base64_fields() {
        let dir = TempDir::new().unwrap();
        let record = store(&dir, "k").seal(&pair()).unwrap();
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        for key in ["iv", "encryptedAccessToken", "encryptedRefreshToken", "expiresAt"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json["iv"].as_str().unwrap().len() >= 16);
        assert!(!json.to_string().contains("access-1"));
    }

    #[test]
    fn test_swapped_ciphertexts_fail() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "k");
        let mut record = store.seal(&pair()).unwrap();
        std::mem::swap(
            &mut record.encrypted_access_token,
            &mut record.encrypted_refresh_token,
        );
        assert_decryption_failed(store.open(&record).unwrap_err());
    }

    #[test]
    fn test_edited_expiry_fails() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "k");
        let mut record = store.seal(&pair()).unwrap();
        record.expires_at = Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
        assert_decryption_failed(store.open(&record).unwrap_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let dir = TempDir::new().unwrap();
        let record = store(&dir, "one").seal(&pair()).unwrap();
        assert_decryption_failed(store(&dir, "two").open(&record).unwrap_err());
    }

    #[test]
    fn test_truncated_iv_fails() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "k");
        let mut record = store.seal(&pair()).unwrap();
        record.iv.truncate(8);
        assert_decryption_failed(store.open(&record).unwrap_err());
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir, "k").load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persist_then_load_pair() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "k");
        store.persist(&pair()).await.unwrap();
        assert_eq!(store.load_pair().await.unwrap(), Some(pair()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = store(&dir, "k");
        store.persist(&pair()).await.unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_rotate_key_switches_cipher() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "old");
        let old_record = store.seal(&pair()).unwrap();

        store
            .rotate_key(TokenCipher::derive_with_iterations("new", 16).unwrap())
            .unwrap();
        assert_decryption_failed(store.open(&old_record).unwrap_err());

        let new_record = store.seal(&pair()).unwrap();
        assert_eq!(self::store(&dir, "new").open(&new_record).unwrap(), pair());
    }
}
