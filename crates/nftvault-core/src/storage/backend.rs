use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::records::{Collection, RecordId};

/// Errors produced by storage backends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// An entry is already stored under this id; backends never overwrite.
    #[error("{collection} entry already exists: {id}")]
    Conflict { collection: Collection, id: RecordId },
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Keyed byte storage for serialized (already encrypted) record envelopes.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Store a value under a fresh id. Fails with `Conflict` if the id is taken.
    async fn insert_new(
        &self,
        collection: Collection,
        id: &RecordId,
        value: &[u8],
    ) -> Result<(), BackendError>;

    async fn get(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<Option<Vec<u8>>, BackendError>;

    /// Ids of a collection in ascending order, without reading the values.
    async fn ids(&self, collection: Collection) -> Result<Vec<RecordId>, BackendError>;

    /// Every entry of a collection in ascending id order.
    async fn scan(&self, collection: Collection) -> Result<Vec<(RecordId, Vec<u8>)>, BackendError>;

    /// Remove an entry (idempotent). Returns whether something was removed.
    async fn remove(&self, collection: Collection, id: &RecordId) -> Result<bool, BackendError>;
}

type Tables = HashMap<Collection, BTreeMap<RecordId, Vec<u8>>>;

/// Process-local backend. Clones share the same tables.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<Tables>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, BackendError> {
        self.inner.lock().map_err(|err| BackendError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

#[async_trait]
impl RecordBackend for InMemoryBackend {
    async fn insert_new(
        &self,
        collection: Collection,
        id: &RecordId,
        value: &[u8],
    ) -> Result<(), BackendError> {
        let mut tables = self.lock()?;
        let table = tables.entry(collection).or_default();
        if table.contains_key(id) {
            debug!(%collection, %id, "refusing to overwrite existing entry");
            return Err(BackendError::Conflict {
                collection,
                id: id.clone(),
            });
        }
        table.insert(id.clone(), value.to_vec());
        Ok(())
    }

    async fn get(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        let tables = self.lock()?;
        Ok(tables
            .get(&collection)
            .and_then(|table| table.get(id))
            .cloned())
    }

    async fn ids(&self, collection: Collection) -> Result<Vec<RecordId>, BackendError> {
        let tables = self.lock()?;
        Ok(tables
            .get(&collection)
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn scan(&self, collection: Collection) -> Result<Vec<(RecordId, Vec<u8>)>, BackendError> {
        let tables = self.lock()?;
        Ok(tables
            .get(&collection)
            .map(|table| {
                table
                    .iter()
                    .map(|(id, value)| (id.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove(&self, collection: Collection, id: &RecordId) -> Result<bool, BackendError> {
        let mut tables = self.lock()?;
        Ok(tables
            .get_mut(&collection)
            .map(|table| table.remove(id).is_some())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let backend = InMemoryBackend::new();
        let id = RecordId::new(Collection::Listings, 1);

        backend
            .insert_new(Collection::Listings, &id, b"envelope")
            .await
            .expect("insert should succeed");
        let stored = backend
            .get(Collection::Listings, &id)
            .await
            .expect("get should succeed");

        assert_eq!(stored.as_deref(), Some(&b"envelope"[..]));
    }

    #[tokio::test]
    async fn collections_are_separate_keyspaces() {
        let backend = InMemoryBackend::new();
        let id = RecordId::from("shared");
        backend
            .insert_new(Collection::Listings, &id, b"a")
            .await
            .expect("insert listing");
        backend
            .insert_new(Collection::Metadata, &id, b"b")
            .await
            .expect("insert metadata under the same id");

        let missing = backend
            .get(Collection::Metadata, &RecordId::from("other"))
            .await
            .expect("get");
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn insert_never_overwrites() {
        let backend = InMemoryBackend::new();
        let id = RecordId::new(Collection::Metadata, 3);
        backend
            .insert_new(Collection::Metadata, &id, b"first")
            .await
            .expect("insert");

        let err = backend
            .insert_new(Collection::Metadata, &id, b"second")
            .await
            .expect_err("second insert should conflict");
        assert!(matches!(err, BackendError::Conflict { .. }));

        let stored = backend.get(Collection::Metadata, &id).await.expect("get");
        assert_eq!(stored.as_deref(), Some(&b"first"[..]));
    }

    #[tokio::test]
    async fn scan_is_ordered_by_id() {
        let backend = InMemoryBackend::new();
        for seq in [3, 1, 2] {
            backend
                .insert_new(
                    Collection::Listings,
                    &RecordId::new(Collection::Listings, seq),
                    &[seq as u8],
                )
                .await
                .expect("insert");
        }

        let sequences: Vec<_> = backend
            .scan(Collection::Listings)
            .await
            .expect("scan")
            .into_iter()
            .map(|(id, _)| id.sequence().expect("minted id"))
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(backend
            .scan(Collection::Metadata)
            .await
            .expect("scan empty")
            .is_empty());
    }

    #[tokio::test]
    async fn ids_match_scan_order() {
        let backend = InMemoryBackend::new();
        for seq in [5, 2] {
            backend
                .insert_new(
                    Collection::Metadata,
                    &RecordId::new(Collection::Metadata, seq),
                    b"{}",
                )
                .await
                .expect("insert");
        }

        let ids = backend.ids(Collection::Metadata).await.expect("ids");
        let scanned: Vec<_> = backend
            .scan(Collection::Metadata)
            .await
            .expect("scan")
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, scanned);
        assert_eq!(ids[0], RecordId::new(Collection::Metadata, 2));
        assert!(backend.ids(Collection::Listings).await.expect("ids").is_empty());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let backend = InMemoryBackend::new();
        let id = RecordId::new(Collection::Listings, 9);
        backend
            .insert_new(Collection::Listings, &id, b"v")
            .await
            .expect("insert");

        assert!(backend.remove(Collection::Listings, &id).await.expect("remove"));
        assert!(!backend
            .remove(Collection::Listings, &id)
            .await
            .expect("remove again"));
        assert_eq!(
            backend.get(Collection::Listings, &id).await.expect("get"),
            None
        );
    }
}
