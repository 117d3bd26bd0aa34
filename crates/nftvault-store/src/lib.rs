//! Record store implementations: every payload goes through a `PayloadCipher` before it
//! reaches a `RecordBackend`, and back through it on read.

pub mod file_backend;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use nftvault_core::{
    blob::PayloadCipher,
    records::{
        Collection, IdGenerator, Listing, ListingReceipt, MetadataEntry, MetadataReceipt,
        RecordId, RecordStore, StoreError, StoredListing, StoredMetadata,
    },
    storage::{BackendError, RecordBackend},
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

pub use file_backend::FileBackend;

/// Record store that encrypts price and metadata independently and persists only
/// ciphertext envelopes.
pub struct EncryptedRecordStore<B: RecordBackend, C: PayloadCipher> {
    backend: Arc<B>,
    cipher: Arc<C>,
    ids: IdGenerator,
}

impl<B: RecordBackend, C: PayloadCipher> EncryptedRecordStore<B, C> {
    /// Open a store over `backend`, continuing the id sequence after any records it holds.
    pub async fn open(backend: B, cipher: C) -> Result<Self, StoreError> {
        let ids = IdGenerator::new();
        let mut records = 0usize;
        for collection in Collection::ALL {
            for id in backend.ids(collection).await? {
                records += 1;
                if let Some(seq) = id.sequence() {
                    ids.observe(seq);
                }
            }
        }
        info!(records, last_sequence = ids.last(), "record store opened");

        Ok(Self {
            backend: Arc::new(backend),
            cipher: Arc::new(cipher),
            ids,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn issue(&self, collection: Collection) -> Result<RecordId, StoreError> {
        self.ids.issue(collection).ok_or_else(|| {
            warn!(%collection, last_sequence = self.ids.last(), "id sequence exhausted");
            StoreError::SequenceExhausted
        })
    }

    async fn insert<T: Serialize>(
        &self,
        collection: Collection,
        id: &RecordId,
        record: &T,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record).map_err(|e| BackendError::Storage {
            reason: format!("serialize {collection} record: {e}"),
        })?;
        self.backend
            .insert_new(collection, id, &bytes)
            .await
            .map_err(|err| match err {
                BackendError::Conflict { id, .. } => StoreError::IdCollision { id },
                other => StoreError::Backend(other),
            })
    }

    async fn load<T: DeserializeOwned + HasRecordId>(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<T, StoreError> {
        let bytes = self
            .backend
            .get(collection, id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection,
                id: id.clone(),
            })?;
        decode(id, &bytes)
    }

    fn open_listing(&self, stored: StoredListing) -> Result<Listing, StoreError> {
        let price = self
            .cipher
            .decrypt(&stored.encrypted_price)
            .map_err(|source| StoreError::Decryption {
                id: stored.id.clone(),
                field: "price",
                source,
            })?;
        let metadata = self
            .cipher
            .decrypt(&stored.encrypted_metadata)
            .map_err(|source| StoreError::Decryption {
                id: stored.id.clone(),
                field: "metadata",
                source,
            })?;

        Ok(Listing {
            price: parse_price(&stored.id, &price)?,
            id: stored.id,
            token_id: stored.token_id,
            metadata,
            seller: stored.seller,
            created_at: stored.created_at,
        })
    }

    fn open_metadata(&self, stored: StoredMetadata) -> Result<MetadataEntry, StoreError> {
        let metadata = self
            .cipher
            .decrypt(&stored.encrypted_metadata)
            .map_err(|source| StoreError::Decryption {
                id: stored.id.clone(),
                field: "metadata",
                source,
            })?;

        Ok(MetadataEntry {
            id: stored.id,
            metadata,
            owner: stored.owner,
            created_at: stored.created_at,
        })
    }
}

#[async_trait]
impl<B: RecordBackend, C: PayloadCipher> RecordStore for EncryptedRecordStore<B, C> {
    #[instrument(skip(self, price, metadata))]
    async fn create_listing(
        &self,
        token_id: String,
        price: f64,
        metadata: Value,
        seller: String,
    ) -> Result<ListingReceipt, StoreError> {
        if !price.is_finite() {
            return Err(StoreError::InvalidInput {
                reason: format!("price must be a finite number, got {price}"),
            });
        }

        let id = self.issue(Collection::Listings)?;
        let encrypted_price = self
            .cipher
            .encrypt(&Value::String(price.to_string()))
            .map_err(|source| StoreError::Encryption {
                id: id.clone(),
                field: "price",
                source,
            })?;
        let encrypted_metadata =
            self.cipher
                .encrypt(&metadata)
                .map_err(|source| StoreError::Encryption {
                    id: id.clone(),
                    field: "metadata",
                    source,
                })?;

        let record = StoredListing {
            id,
            token_id,
            seller,
            encrypted_price,
            encrypted_metadata,
            created_at: Utc::now(),
        };
        self.insert(Collection::Listings, &record.id, &record)
            .await?;
        debug!(id = %record.id, "listing created");

        Ok(ListingReceipt {
            id: record.id,
            token_id: record.token_id,
        })
    }

    #[instrument(skip_all, fields(id = %id))]
    async fn get_listing(&self, id: &RecordId) -> Result<Listing, StoreError> {
        let stored: StoredListing = self.load(Collection::Listings, id).await?;
        self.open_listing(stored)
    }

    #[instrument(skip(self))]
    async fn list_listings(&self) -> Result<Vec<Listing>, StoreError> {
        let entries = self.backend.scan(Collection::Listings).await?;
        let mut listings = Vec::with_capacity(entries.len());
        for (id, bytes) in entries {
            let listing = decode(&id, &bytes)
                .and_then(|stored| self.open_listing(stored))
                .map_err(|err| {
                    warn!(%id, error = %err, "listing could not be read; failing enumeration");
                    err
                })?;
            listings.push(listing);
        }
        Ok(listings)
    }

    #[instrument(skip(self, metadata))]
    async fn store_metadata(
        &self,
        metadata: Value,
        owner: String,
    ) -> Result<MetadataReceipt, StoreError> {
        let id = self.issue(Collection::Metadata)?;
        let encrypted_metadata =
            self.cipher
                .encrypt(&metadata)
                .map_err(|source| StoreError::Encryption {
                    id: id.clone(),
                    field: "metadata",
                    source,
                })?;

        let record = StoredMetadata {
            id,
            owner,
            encrypted_metadata,
            created_at: Utc::now(),
        };
        self.insert(Collection::Metadata, &record.id, &record)
            .await?;
        debug!(id = %record.id, "metadata stored");

        Ok(MetadataReceipt { id: record.id })
    }

    #[instrument(skip_all, fields(id = %id))]
    async fn get_metadata(&self, id: &RecordId) -> Result<MetadataEntry, StoreError> {
        let stored: StoredMetadata = self.load(Collection::Metadata, id).await?;
        self.open_metadata(stored)
    }

    #[instrument(skip_all, fields(id = %id))]
    async fn evict_listing(&self, id: &RecordId) -> Result<bool, StoreError> {
        Ok(self.backend.remove(Collection::Listings, id).await?)
    }

    #[instrument(skip_all, fields(id = %id))]
    async fn evict_metadata(&self, id: &RecordId) -> Result<bool, StoreError> {
        Ok(self.backend.remove(Collection::Metadata, id).await?)
    }
}

/// Deserialize an envelope and check it is stored under its own id.
fn decode<T>(id: &RecordId, bytes: &[u8]) -> Result<T, StoreError>
where
    T: DeserializeOwned + HasRecordId,
{
    let record: T = serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        id: id.clone(),
        reason: e.to_string(),
    })?;
    if record.record_id() != id {
        return Err(StoreError::Corrupt {
            id: id.clone(),
            reason: format!("envelope claims id {}", record.record_id()),
        });
    }
    Ok(record)
}

trait HasRecordId {
    fn record_id(&self) -> &RecordId;
}

impl HasRecordId for StoredListing {
    fn record_id(&self) -> &RecordId {
        &self.id
    }
}

impl HasRecordId for StoredMetadata {
    fn record_id(&self) -> &RecordId {
        &self.id
    }
}

fn parse_price(id: &RecordId, value: &Value) -> Result<f64, StoreError> {
    let parsed = match value {
        Value::String(text) => text.parse::<f64>().ok(),
        Value::Number(number) => number.as_f64(),
        _ => None,
    };
    parsed.ok_or_else(|| StoreError::Corrupt {
        id: id.clone(),
        reason: "price is not a number".to_string(),
    })
}
