//! Encryption boundary for nftvault: AES-256-GCM over structured values, with keys
//! sourced from the environment (or test doubles) and per-subject key derivation.

pub mod key_provider;
pub mod service;

pub use key_provider::{EncryptionKey, KeyError, KeyProvider};
pub use service::EncryptionService;
