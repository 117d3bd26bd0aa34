use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    blob::{CryptoError, EncryptedBlob},
    storage::BackendError,
};

/// The two keyspaces a record store manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Listings,
    Metadata,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Listings, Collection::Metadata];

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.prefix() == prefix)
    }

    /// Prefix used in record identifiers.
    pub fn prefix(self) -> &'static str {
        match self {
            Collection::Listings => "lst",
            Collection::Metadata => "meta",
        }
    }

    /// Stable name, also used as a directory name by file backends.
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Listings => "listings",
            Collection::Metadata => "metadata",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digits in the sequence part of a minted id.
const SEQUENCE_WIDTH: usize = 12;

/// Largest sequence that still fits the fixed-width id format.
pub const MAX_SEQUENCE: u64 = 999_999_999_999;

/// Store-assigned record identifier, e.g. `lst-000000000042`.
///
/// The sequence part is zero padded so lexical order matches creation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(collection: Collection, sequence: u64) -> Self {
        Self(format!("{}-{sequence:012}", collection.prefix()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sequence number for ids minted by [`IdGenerator`]; `None` for foreign strings.
    pub fn sequence(&self) -> Option<u64> {
        let (prefix, seq) = self.0.split_once('-')?;
        Collection::from_prefix(prefix)?;
        if seq.len() != SEQUENCE_WIDTH || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        seq.parse().ok()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Hands out unique ids from a single atomic sequence shared by all collections.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue numbering after `last`, used when reopening a persisted store.
    pub fn resume_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Next id, or `None` once the sequence would outgrow the fixed-width format.
    pub fn issue(&self, collection: Collection) -> Option<RecordId> {
        self.last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                last.checked_add(1).filter(|next| *next <= MAX_SEQUENCE)
            })
            .ok()
            .map(|previous| RecordId::new(collection, previous + 1))
    }

    /// Make sure future ids are issued after `sequence`.
    pub fn observe(&self, sequence: u64) {
        self.last.fetch_max(sequence, Ordering::SeqCst);
    }

    pub fn last(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

/// Decrypted marketplace listing as handed to authorized readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: RecordId,
    pub token_id: String,
    pub price: f64,
    pub metadata: Value,
    pub seller: String,
    pub created_at: DateTime<Utc>,
}

/// Public-safe projection returned when a listing is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingReceipt {
    pub id: RecordId,
    pub token_id: String,
}

/// Decrypted NFT metadata entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    pub id: RecordId,
    pub metadata: Value,
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataReceipt {
    pub id: RecordId,
}

/// At-rest form of a listing. Price and metadata are separate ciphertexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredListing {
    pub id: RecordId,
    pub token_id: String,
    pub seller: String,
    pub encrypted_price: EncryptedBlob,
    pub encrypted_metadata: EncryptedBlob,
    pub created_at: DateTime<Utc>,
}

/// At-rest form of a metadata entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMetadata {
    pub id: RecordId,
    pub owner: String,
    pub encrypted_metadata: EncryptedBlob,
    pub created_at: DateTime<Utc>,
}

/// Errors surfaced by record stores. Every variant that concerns a record names its id.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} record not found: {id}")]
    NotFound { collection: Collection, id: RecordId },
    #[error("failed to encrypt {field} of record {id}: {source}")]
    Encryption {
        id: RecordId,
        field: &'static str,
        #[source]
        source: CryptoError,
    },
    #[error("failed to decrypt {field} of record {id}: {source}")]
    Decryption {
        id: RecordId,
        field: &'static str,
        #[source]
        source: CryptoError,
    },
    #[error("record id already in use: {id}")]
    IdCollision { id: RecordId },
    #[error("record id sequence exhausted")]
    SequenceExhausted,
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },
    #[error("stored record {id} is corrupt: {reason}")]
    Corrupt { id: RecordId, reason: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Encrypted record store contract: listings and NFT metadata, decrypted only on read.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Encrypt and persist a listing; the receipt carries no price or metadata.
    async fn create_listing(
        &self,
        token_id: String,
        price: f64,
        metadata: Value,
        seller: String,
    ) -> Result<ListingReceipt, StoreError>;

    async fn get_listing(&self, id: &RecordId) -> Result<Listing, StoreError>;

    /// All listings in creation order. Fails as a whole if any record cannot be decrypted.
    async fn list_listings(&self) -> Result<Vec<Listing>, StoreError>;

    async fn store_metadata(
        &self,
        metadata: Value,
        owner: String,
    ) -> Result<MetadataReceipt, StoreError>;

    async fn get_metadata(&self, id: &RecordId) -> Result<MetadataEntry, StoreError>;

    /// Remove a listing. Returns whether it existed.
    async fn evict_listing(&self, id: &RecordId) -> Result<bool, StoreError>;

    async fn evict_metadata(&self, id: &RecordId) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, thread};

    use super::*;

    #[test]
    fn ids_sort_in_creation_order() {
        let ids = IdGenerator::new();
        let first = ids.issue(Collection::Listings).expect("id");
        let second = ids.issue(Collection::Listings).expect("id");
        assert_eq!(first.as_str(), "lst-000000000001");
        assert!(first < second);
        assert_eq!(second.sequence(), Some(2));
    }

    #[test]
    fn sequence_is_shared_across_collections() {
        let ids = IdGenerator::new();
        let listing = ids.issue(Collection::Listings).expect("id");
        let metadata = ids.issue(Collection::Metadata).expect("id");
        assert_eq!(listing.sequence(), Some(1));
        assert_eq!(metadata.as_str(), "meta-000000000002");
    }

    #[test]
    fn resume_and_observe_never_reissue() {
        let ids = IdGenerator::resume_after(41);
        assert_eq!(
            ids.issue(Collection::Metadata).expect("id").sequence(),
            Some(42)
        );
        ids.observe(10);
        assert_eq!(ids.last(), 42);
        ids.observe(100);
        assert_eq!(
            ids.issue(Collection::Listings).expect("id").sequence(),
            Some(101)
        );
    }

    #[test]
    fn foreign_ids_have_no_sequence() {
        assert_eq!(RecordId::from("nonexistent").sequence(), None);
        assert_eq!(RecordId::from("1700000000000").sequence(), None);
    }

    #[test]
    fn sequence_requires_known_prefix_and_fixed_width() {
        assert_eq!(RecordId::from("meta-000000000007").sequence(), Some(7));
        assert_eq!(RecordId::from("x-18446744073709551615").sequence(), None);
        assert_eq!(RecordId::from("lst-18446744073709551615").sequence(), None);
        assert_eq!(RecordId::from("lst-7").sequence(), None);
        assert_eq!(RecordId::from("lst-+00000000007").sequence(), None);
        assert_eq!(RecordId::from("lst-000000000001-2").sequence(), None);
    }

    #[test]
    fn issue_stops_at_the_end_of_the_sequence() {
        let ids = IdGenerator::resume_after(MAX_SEQUENCE - 1);
        let last = ids.issue(Collection::Listings).expect("final id");
        assert_eq!(last.as_str(), "lst-999999999999");
        assert_eq!(ids.issue(Collection::Listings), None);
        assert_eq!(ids.last(), MAX_SEQUENCE);

        let saturated = IdGenerator::resume_after(u64::MAX);
        assert_eq!(saturated.issue(Collection::Metadata), None);
    }

    #[test]
    fn concurrent_generation_yields_distinct_ids() {
        let ids = Arc::new(IdGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || {
                    (0..250)
                        .map(|_| ids.issue(Collection::Listings).expect("id"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("thread") {
                assert!(seen.insert(id), "duplicate id issued");
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[test]
    fn receipt_serializes_only_public_fields() {
        let receipt = ListingReceipt {
            id: RecordId::new(Collection::Listings, 7),
            token_id: "tok-1".into(),
        };
        let value = serde_json::to_value(&receipt).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({"id": "lst-000000000007", "tokenId": "tok-1"})
        );
    }
}
