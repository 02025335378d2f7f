//! Shopwright CLI - Database migrations and catalog tools.
//!
//! ```bash
//! # Apply pending migrations to DATABASE_URL
//! sw-cli migrate
//!
//! # Check a catalog file without touching the database
//! sw-cli seed products catalog.yaml --check
//!
//! # Upsert catalog products
//! sw-cli seed products catalog.yaml --currency EUR
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shopwright_core::CurrencyCode;

use crate::commands::CommandError;

mod commands;

#[derive(Parser)]
#[command(name = "sw-cli")]
#[command(author, version, about = "Shopwright CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    /// Load development data
    Seed {
        #[command(subcommand)]
        target: SeedTarget,
    },
}

#[derive(Subcommand)]
enum SeedTarget {
    /// Upsert catalog products from a YAML file
    Products {
        /// Path to the YAML file
        file: String,

        /// Currency the prices are quoted in
        #[arg(long, default_value = "USD")]
        currency: CurrencyCode,

        /// Only parse and validate the file
        #[arg(long)]
        check: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await,
        Commands::Seed {
            target:
                SeedTarget::Products {
                    file,
                    currency,
                    check,
                },
        } => commands::seed::products(&file, currency, check).await,
    }
}
