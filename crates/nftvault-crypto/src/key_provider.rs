use std::{
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// Environment variable consulted for the base key when nothing else is configured.
pub const DEFAULT_KEY_ENV: &str = "NFTVAULT_ENCRYPTION_KEY";

/// Secrets starting with this prefix carry raw key bytes instead of a passphrase.
const RAW_KEY_PREFIX: &str = "base64:";

/// Symmetric key material. Held in memory only; `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    /// Identifier for logging (never log key bytes).
    label: String,
    bytes: [u8; KEY_LEN],
}

impl EncryptionKey {
    pub fn from_bytes(label: impl Into<String>, bytes: [u8; KEY_LEN]) -> Self {
        Self {
            label: label.into(),
            bytes,
        }
    }

    /// Stretch an arbitrary-length secret string into a 256-bit key with SHA-256.
    pub fn from_passphrase(label: impl Into<String>, passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        Self::from_bytes(label, digest.into())
    }

    /// Decode exactly 32 raw key bytes from standard base64.
    pub fn from_base64(label: impl Into<String>, encoded: &str) -> Result<Self, KeyError> {
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| KeyError::Decode(e.to_string()))?;

        if bytes.len() != KEY_LEN {
            return Err(KeyError::Decode(format!(
                "expected {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(&bytes);
        Ok(Self::from_bytes(label, out))
    }

    pub fn generate(label: impl Into<String>) -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self::from_bytes(label, bytes)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.bytes)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("label", &self.label)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

/// One-way per-subject key: `SHA-256(subject || base key)`.
pub fn derive_subject_key(subject: &str, base: &EncryptionKey) -> EncryptionKey {
    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hasher.update(base.as_bytes());
    EncryptionKey::from_bytes(
        format!("{}/{subject}", base.label()),
        hasher.finalize().into(),
    )
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no encryption key configured (set {0})")]
    Missing(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Supplies the process-wide base key.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn load(&self) -> Result<EncryptionKey, KeyError>;
}

/// Reads the base key from an environment variable.
///
/// `base64:<32 bytes>` is used verbatim; any other value is treated as a passphrase.
#[derive(Debug, Clone)]
pub struct EnvKeyProvider {
    var: String,
}

impl EnvKeyProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl KeyProvider for EnvKeyProvider {
    async fn load(&self) -> Result<EncryptionKey, KeyError> {
        let raw = std::env::var(&self.var).map_err(|_| KeyError::Missing(self.var.clone()))?;
        parse_secret(&self.var, &raw)
    }
}

/// Provider for a key that is already known (e.g. injected by an embedding process).
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    key: EncryptionKey,
}

impl StaticKeyProvider {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn load(&self) -> Result<EncryptionKey, KeyError> {
        Ok(self.key.clone())
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<EncryptionKey>>>,
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn load(&self) -> Result<EncryptionKey, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        if let Some(existing) = guard.clone() {
            return Ok(existing);
        }

        let key = EncryptionKey::generate("ephemeral");
        *guard = Some(key.clone());
        Ok(key)
    }
}

fn parse_secret(label: &str, raw: &str) -> Result<EncryptionKey, KeyError> {
    let secret = raw.trim();
    if secret.is_empty() {
        return Err(KeyError::Missing(label.to_string()));
    }
    match secret.strip_prefix(RAW_KEY_PREFIX) {
        Some(encoded) => EncryptionKey::from_base64(label, encoded),
        None => Ok(EncryptionKey::from_passphrase(label, secret)),
    }
}
