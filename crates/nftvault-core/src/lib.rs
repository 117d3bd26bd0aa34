//! Core contracts for nftvault: encrypted blobs, record types, the record store trait,
//! and the storage backend it writes ciphertext envelopes to.
//! Kept free of cipher and filesystem code so backends and ciphers can be swapped.

pub mod blob;
pub mod records;
pub mod storage;
