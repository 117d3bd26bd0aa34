use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use nftvault_core::blob::{CryptoError, EncryptedBlob, PayloadCipher, PayloadKind, BLOB_VERSION};
use serde_json::Value;
use tracing::trace;

use crate::key_provider::{derive_subject_key, EncryptionKey};

const NONCE_LEN: usize = 12;

/// AES-256-GCM encryption of structured values under a process-wide base key.
///
/// Strings are encrypted as-is; every other value is serialized to JSON first. The
/// payload kind travels with the blob and is authenticated as associated data, so
/// relabelling a blob makes decryption fail instead of changing how it is parsed.
///
/// Holds no mutable state and can be shared freely between tasks.
#[derive(Debug, Clone)]
pub struct EncryptionService {
    base_key: EncryptionKey,
}

impl EncryptionService {
    pub fn new(base_key: EncryptionKey) -> Self {
        Self { base_key }
    }

    pub fn key_label(&self) -> &str {
        self.base_key.label()
    }

    /// Encrypt under the base key.
    pub fn encrypt(&self, value: &Value) -> Result<EncryptedBlob, CryptoError> {
        Self::encrypt_with(value, &self.base_key)
    }

    /// Decrypt with the base key.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Value, CryptoError> {
        Self::decrypt_with(blob, &self.base_key)
    }

    /// Key scoped to one subject (e.g. a wallet address), derived from the base key.
    pub fn subject_key(&self, subject: &str) -> EncryptionKey {
        derive_subject_key(subject, &self.base_key)
    }

    pub fn encrypt_for_subject(
        &self,
        value: &Value,
        subject: &str,
    ) -> Result<EncryptedBlob, CryptoError> {
        Self::encrypt_with(value, &self.subject_key(subject))
    }

    pub fn decrypt_for_subject(
        &self,
        blob: &EncryptedBlob,
        subject: &str,
    ) -> Result<Value, CryptoError> {
        Self::decrypt_with(blob, &self.subject_key(subject))
    }

    pub fn encrypt_with(value: &Value, key: &EncryptionKey) -> Result<EncryptedBlob, CryptoError> {
        let kind = PayloadKind::of(value);
        let plaintext = match value {
            Value::String(text) => text.as_bytes().to_vec(),
            other => serde_json::to_vec(other)
                .map_err(|e| CryptoError::Encryption(format!("serialize payload: {e}")))?,
        };

        let cipher = build_cipher(key).map_err(CryptoError::Encryption)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let aad = associated_data(BLOB_VERSION, kind);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| CryptoError::Encryption(format!("encrypt failed: {e}")))?;

        trace!(key = key.label(), ?kind, len = plaintext.len(), "encrypted payload");
        Ok(EncryptedBlob {
            version: BLOB_VERSION,
            kind,
            nonce: URL_SAFE_NO_PAD.encode(nonce.as_slice()),
            ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        })
    }

    pub fn decrypt_with(blob: &EncryptedBlob, key: &EncryptionKey) -> Result<Value, CryptoError> {
        if blob.version != BLOB_VERSION {
            return Err(CryptoError::Decryption(format!(
                "unsupported blob version {}",
                blob.version
            )));
        }

        let nonce_bytes = URL_SAFE_NO_PAD
            .decode(&blob.nonce)
            .map_err(|e| CryptoError::Decryption(format!("nonce decode failed: {e}")))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CryptoError::Decryption(format!(
                "expected {NONCE_LEN}-byte nonce, got {}",
                nonce_bytes.len()
            )));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = URL_SAFE_NO_PAD
            .decode(&blob.ciphertext)
            .map_err(|e| CryptoError::Decryption(format!("ciphertext decode failed: {e}")))?;

        let cipher = build_cipher(key).map_err(CryptoError::Decryption)?;
        let aad = associated_data(blob.version, blob.kind);
        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| {
                CryptoError::Decryption("authentication failed (wrong key or tampered data)".into())
            })?;

        let text = String::from_utf8(plaintext)
            .map_err(|e| CryptoError::Decryption(format!("plaintext is not UTF-8: {e}")))?;

        Ok(match blob.kind {
            PayloadKind::Text => Value::String(text),
            PayloadKind::Json => match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(_) => {
                    trace!(key = key.label(), "json payload did not parse, returning raw text");
                    Value::String(text)
                }
            },
        })
    }
}

impl PayloadCipher for EncryptionService {
    fn encrypt(&self, value: &Value) -> Result<EncryptedBlob, CryptoError> {
        Self::encrypt_with(value, &self.base_key)
    }

    fn decrypt(&self, blob: &EncryptedBlob) -> Result<Value, CryptoError> {
        Self::decrypt_with(blob, &self.base_key)
    }
}

fn build_cipher(key: &EncryptionKey) -> Result<Aes256Gcm, String> {
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| format!("cipher init failed: {e}"))
}

fn associated_data(version: u8, kind: PayloadKind) -> [u8; 2] {
    [version, kind.as_byte()]
}
