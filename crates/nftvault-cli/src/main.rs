mod cli;
mod config;
mod records;
mod storage;

use crate::cli::ConfigCommand;
use clap::Parser;
use color_eyre::Result;
use nftvault_core::records::RecordStore;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit status for lookups that found nothing (the CLI's 404).
const NOT_FOUND_EXIT: i32 = 4;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    match dispatch(cli.command, config::load).await {
        Err(err) if records::is_not_found(&err) => {
            eprintln!("not found: {err}");
            std::process::exit(NOT_FOUND_EXIT);
        }
        other => other,
    }
}

/// Loads the config only for commands that use it, so `version` works with a broken file.
async fn dispatch(
    command: cli::Command,
    load_config: impl FnOnce() -> Result<config::Config>,
) -> Result<()> {
    match command {
        cli::Command::Version => {
            print_version();
            Ok(())
        }
        other => run(other, &load_config()?).await,
    }
}

async fn run(command: cli::Command, config: &config::Config) -> Result<()> {
    match command {
        cli::Command::Version => print_version(),
        cli::Command::Health => run_health_check(config).await?,
        cli::Command::Config(ConfigCommand::Init) => init_config(config)?,
        cli::Command::Listing(cmd) => {
            let store = storage::open_store(config).await?;
            print_json(&records::handle_listing(&store, cmd).await?)?;
        }
        cli::Command::Metadata(cmd) => {
            let store = storage::open_store(config).await?;
            print_json(&records::handle_metadata(&store, cmd).await?)?;
        }
    }
    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info. Logs go to stderr; stdout carries JSON.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("nftvault {}", env!("CARGO_PKG_VERSION"));
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Runs a quick encrypt/store/decrypt round trip against the configured store.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let store = storage::open_store(config).await?;
    run_store_health(&store).await?;
    println!("Storage: ok");
    Ok(())
}

async fn run_store_health<S: RecordStore>(store: &S) -> Result<()> {
    let payload = json!({"health": "ok"});
    let receipt = store
        .store_metadata(payload.clone(), "health/check".to_string())
        .await?;
    let round_trip = store.get_metadata(&receipt.id).await;
    store.evict_metadata(&receipt.id).await?;

    if round_trip?.metadata != payload {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
