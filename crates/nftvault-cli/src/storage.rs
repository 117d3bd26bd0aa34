use std::path::PathBuf;

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use nftvault_crypto::{
    key_provider::{EnvKeyProvider, KeyProvider},
    EncryptionService,
};
use nftvault_store::{EncryptedRecordStore, FileBackend};
use tracing::debug;

pub type CliStore = EncryptedRecordStore<FileBackend, EncryptionService>;

/// Resolve the default data directory for nftvault.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("nftvault"))
}

/// Record store root, honouring the config override.
pub fn data_dir_from_config(config: &Config) -> Result<PathBuf> {
    match &config.data_dir {
        Some(root) => Ok(root.clone()),
        None => default_data_dir(),
    }
}

/// Open the file-backed store with the base key taken from the configured env var.
pub async fn open_store(config: &Config) -> Result<CliStore> {
    open_store_with(config, &EnvKeyProvider::new(config.key_env())).await
}

/// Open the file-backed store with a key from `keys`.
pub async fn open_store_with<P: KeyProvider>(config: &Config, keys: &P) -> Result<CliStore> {
    let root = data_dir_from_config(config)?;
    let cipher = EncryptionService::new(keys.load().await?);
    debug!(?root, key = cipher.key_label(), "opening encrypted record store");
    let store = EncryptedRecordStore::open(FileBackend::new(root), cipher).await?;
    Ok(store)
}

/// Helper for tests to open a store rooted at a temp dir with a throwaway key.
#[cfg(test)]
pub async fn test_store(root: impl Into<PathBuf>) -> CliStore {
    use nftvault_crypto::{key_provider::StaticKeyProvider, EncryptionKey};

    let config = Config {
        data_dir: Some(root.into()),
        key_env: None,
    };
    let keys = StaticKeyProvider::new(EncryptionKey::generate("test"));
    open_store_with(&config, &keys)
        .await
        .expect("open test store")
}

#[cfg(test)]
mod tests {
    use nftvault_core::records::RecordStore;
    use nftvault_crypto::key_provider::InMemoryKeyProvider;
    use serde_json::json;

    use super::*;

    #[test]
    fn config_override_wins() {
        let cfg = Config {
            data_dir: Some(PathBuf::from("/tmp/nftvault-override")),
            key_env: None,
        };
        assert_eq!(
            data_dir_from_config(&cfg).expect("resolve"),
            PathBuf::from("/tmp/nftvault-override")
        );
    }

    #[tokio::test]
    async fn open_store_requires_a_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config {
            data_dir: Some(dir.path().to_path_buf()),
            key_env: Some("NFTVAULT_CLI_TEST_KEY_NEVER_SET".into()),
        };
        let err = open_store(&cfg).await.err().expect("missing key must fail");
        assert!(err.to_string().contains("NFTVAULT_CLI_TEST_KEY_NEVER_SET"));
    }

    #[tokio::test]
    async fn same_provider_reopens_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config {
            data_dir: Some(dir.path().to_path_buf()),
            key_env: None,
        };
        let keys = InMemoryKeyProvider::default();

        let receipt = open_store_with(&cfg, &keys)
            .await
            .expect("open")
            .store_metadata(json!({"name": "Art"}), "0xowner".into())
            .await
            .expect("store");

        let reopened = open_store_with(&cfg, &keys).await.expect("reopen");
        let entry = reopened.get_metadata(&receipt.id).await.expect("get");
        assert_eq!(entry.metadata, json!({"name": "Art"}));

        let stranger = open_store_with(&cfg, &InMemoryKeyProvider::default())
            .await
            .expect("open with another key");
        assert!(stranger.get_metadata(&receipt.id).await.is_err());
    }
}
