use std::convert::Infallible;

use clap::{Parser, Subcommand};
use serde_json::Value;

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "nftvault",
    about = "Encrypted record store for marketplace listings and NFT metadata",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Check that the key is configured and the store round-trips a record.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Create and read marketplace listings.
    #[command(subcommand)]
    Listing(ListingCommand),
    /// Store and read NFT metadata.
    #[command(subcommand)]
    Metadata(MetadataCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ListingCommand {
    /// Encrypt and store a new listing; prints only its id and token id.
    Create {
        #[arg(long)]
        token_id: String,
        #[arg(long)]
        price: f64,
        /// JSON document; anything that does not parse is stored as a string.
        #[arg(long, value_parser = parse_payload, default_value = "{}")]
        metadata: Value,
        #[arg(long)]
        seller: String,
    },
    /// Decrypt and print one listing.
    Get { id: String },
    /// Decrypt and print every listing in creation order.
    List,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum MetadataCommand {
    /// Encrypt and store a metadata document.
    Store {
        #[arg(long, value_parser = parse_payload)]
        metadata: Value,
        #[arg(long)]
        owner: String,
    },
    /// Decrypt and print one metadata entry.
    Get { id: String },
}

fn parse_payload(raw: &str) -> Result<Value, Infallible> {
    Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_health_subcommand() {
        let cli = Cli::try_parse_from(["nftvault", "health"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Health);
    }

    #[test]
    fn requires_a_subcommand() {
        assert!(Cli::try_parse_from(["nftvault"]).is_err());
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli =
            Cli::try_parse_from(["nftvault", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Config(ConfigCommand::Init));
    }

    #[test]
    fn parses_listing_create_with_json_metadata() {
        let cli = Cli::try_parse_from([
            "nftvault",
            "listing",
            "create",
            "--token-id",
            "tok-1",
            "--price",
            "1.5",
            "--metadata",
            r#"{"name":"Art"}"#,
            "--seller",
            "0xabc",
        ])
        .expect("parse should succeed");

        assert_eq!(
            cli.command,
            Command::Listing(ListingCommand::Create {
                token_id: "tok-1".into(),
                price: 1.5,
                metadata: json!({"name": "Art"}),
                seller: "0xabc".into(),
            })
        );
    }

    #[test]
    fn listing_metadata_defaults_to_empty_object() {
        let cli = Cli::try_parse_from([
            "nftvault", "listing", "create", "--token-id", "t", "--price", "2", "--seller", "s",
        ])
        .expect("parse should succeed");
        let Command::Listing(ListingCommand::Create { metadata, .. }) = cli.command else {
            panic!("expected listing create");
        };
        assert_eq!(metadata, json!({}));
    }

    #[test]
    fn non_json_metadata_is_kept_as_text() {
        let cli = Cli::try_parse_from([
            "nftvault",
            "metadata",
            "store",
            "--metadata",
            "just words",
            "--owner",
            "0xowner",
        ])
        .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Metadata(MetadataCommand::Store {
                metadata: json!("just words"),
                owner: "0xowner".into(),
            })
        );
    }

    #[test]
    fn parses_get_commands() {
        let cli = Cli::try_parse_from(["nftvault", "listing", "get", "lst-000000000001"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Listing(ListingCommand::Get {
                id: "lst-000000000001".into()
            })
        );
        let cli = Cli::try_parse_from(["nftvault", "listing", "list"]).expect("parse");
        assert_eq!(cli.command, Command::Listing(ListingCommand::List));
    }
}
