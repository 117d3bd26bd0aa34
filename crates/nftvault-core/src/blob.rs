use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Current envelope version written by ciphers.
pub const BLOB_VERSION: u8 = 1;

/// Errors raised at the encryption boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Serialization or cipher failure on the write path.
    #[error("encryption failed: {0}")]
    Encryption(String),
    /// Malformed envelope, wrong key, or tampered ciphertext on the read path.
    #[error("decryption failed: {0}")]
    Decryption(String),
}

/// How the plaintext inside a blob should be reconstructed.
///
/// Carried next to the ciphertext (and authenticated with it) so a string payload that
/// happens to look like JSON, e.g. `"123"`, comes back as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Text,
    Json,
}

impl PayloadKind {
    /// Classify a value the way it will be serialized before encryption.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => PayloadKind::Text,
            _ => PayloadKind::Json,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            PayloadKind::Text => 0,
            PayloadKind::Json => 1,
        }
    }
}

/// Opaque ciphertext of a single value. Only a cipher can turn it back into plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub version: u8,
    pub kind: PayloadKind,
    /// URL-safe base64 nonce.
    pub nonce: String,
    /// URL-safe base64 ciphertext including the authentication tag.
    pub ciphertext: String,
}

/// Symmetric cipher over structured values, used by record stores on every read and write.
pub trait PayloadCipher: Send + Sync {
    fn encrypt(&self, value: &Value) -> Result<EncryptedBlob, CryptoError>;

    fn decrypt(&self, blob: &EncryptedBlob) -> Result<Value, CryptoError>;
}
