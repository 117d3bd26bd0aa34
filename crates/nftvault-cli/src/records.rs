use color_eyre::Result;
use nftvault_core::records::{RecordId, RecordStore, StoreError};
use serde_json::Value;
use tracing::info;

use crate::cli::{ListingCommand, MetadataCommand};

/// Execute a listing subcommand and return the JSON document to print.
pub async fn handle_listing<S: RecordStore>(store: &S, cmd: ListingCommand) -> Result<Value> {
    let output = match cmd {
        ListingCommand::Create {
            token_id,
            price,
            metadata,
            seller,
        } => {
            let receipt = store
                .create_listing(token_id, price, metadata, seller)
                .await?;
            info!(id = %receipt.id, "listing created");
            serde_json::to_value(receipt)?
        }
        ListingCommand::Get { id } => {
            serde_json::to_value(store.get_listing(&RecordId::from(id)).await?)?
        }
        ListingCommand::List => serde_json::to_value(store.list_listings().await?)?,
    };
    Ok(output)
}

/// Execute a metadata subcommand and return the JSON document to print.
pub async fn handle_metadata<S: RecordStore>(store: &S, cmd: MetadataCommand) -> Result<Value> {
    let output = match cmd {
        MetadataCommand::Store { metadata, owner } => {
            let receipt = store.store_metadata(metadata, owner).await?;
            info!(id = %receipt.id, "metadata stored");
            serde_json::to_value(receipt)?
        }
        MetadataCommand::Get { id } => {
            serde_json::to_value(store.get_metadata(&RecordId::from(id)).await?)?
        }
    };
    Ok(output)
}

/// True when the report wraps a lookup miss rather than a fault.
pub fn is_not_found(err: &color_eyre::Report) -> bool {
    err.downcast_ref::<StoreError>()
        .is_some_and(StoreError::is_not_found)
}
