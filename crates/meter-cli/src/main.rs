//! Meter CLI - usage metering administration
//!
//! A command-line interface for issuing API keys, inspecting usage counters,
//! authorizing test requests and reconciling billing slices.

mod commands;
mod output;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use meter_core::{Database, KvStore, MeterConfig};

#[derive(Parser)]
#[command(name = "meter")]
#[command(author, version, about = "Usage metering and quota administration CLI", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: table (default) or json
    #[arg(long, global = true, default_value = "table")]
    format: output::OutputFormat,

    /// Suppress progress messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Override database path (or set METER_DB_PATH env var)
    #[arg(long, env = "METER_DB_PATH", global = true)]
    db: Option<String>,

    /// Log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue and manage API keys
    Key {
        #[command(subcommand)]
        action: commands::key::KeyAction,
    },

    /// Inspect usage counters
    Usage {
        #[command(subcommand)]
        action: commands::usage::UsageAction,
    },

    /// Authorize and charge a request, as the API server would
    Authorize(commands::authorize::AuthorizeArgs),

    /// Billing slices and reconciliation
    Billing {
        #[command(subcommand)]
        action: commands::billing::BillingAction,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Set up database path if provided
    if let Some(db_path) = &cli.db {
        std::env::set_var("METER_DB_PATH", db_path);
    }

    let config = MeterConfig::from_env()?;

    // Initialize database
    let db = Database::new(&config).await?;
    let store: Arc<dyn KvStore> = Arc::new(db.store());

    // Create context for commands
    let ctx = commands::Context {
        store,
        config,
        format: cli.format,
        quiet: cli.quiet,
    };

    // Execute command
    match cli.command {
        Commands::Key { action } => commands::key::execute(&ctx, action).await,
        Commands::Usage { action } => commands::usage::execute(&ctx, action).await,
        Commands::Authorize(args) => commands::authorize::execute(&ctx, args).await,
        Commands::Billing { action } => commands::billing::execute(&ctx, action).await,
        Commands::Config { action } => commands::config::execute(&ctx, action).await,
    }
}
