mod cli;
mod config;
mod records;
mod storage;

use std::sync::Arc;

use crate::cli::{Command, ConfigCommand};
use clap::Parser;
use color_eyre::Result;
use secretdb_storage::record_store::SqlCipherRecordStore;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        Command::Add { value } => {
            let db = storage::open_secret_database(&config).await?;
            let id = records::add(&db, value.join(" ")).await?;
            println!("Stored secret #{id}");
        }
        Command::List { json } => {
            let db = storage::open_secret_database(&config).await?;
            println!("{}", records::list(&db, json).await?);
        }
        Command::Clear => {
            let db = storage::open_secret_database(&config).await?;
            let removed = records::clear(&db).await?;
            println!("Cleared {removed} secret(s)");
        }
        Command::Shell => {
            let db = Arc::new(storage::open_secret_database(&config).await?);
            records::run_shell(db, BufReader::new(tokio::io::stdin())).await?;
        }
        Command::Health => run_health_check(&config).await?,
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        Command::Version => print_version(),
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info. Logs go to stderr so list output stays clean.
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
    println!("secretdb {}", env!("CARGO_PKG_VERSION"));
}

/// Loads the key through the keyring and opens the encrypted database.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let db = storage::open_secret_database(config).await?;
    let count = store_health(&db).await?;
    println!("Storage: ok ({count} record(s) at {})", db.path().display());
    Ok(())
}

async fn store_health(db: &SqlCipherRecordStore) -> Result<i64> {
    Ok(db.count().await?)
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(&storage::resolved_config(config)?)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
