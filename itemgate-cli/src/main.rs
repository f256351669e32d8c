//! ItemGate CLI - the inspection gateway binary.
//!
//! # Architecture
//!
//! The CLI is organized into:
//! - `Cli` / `Commands`: Argument parsing (clap)
//! - `logging`: Console tracing, with optional daily-rotated file output
//! - `CliError`: Centralized error handling with user-friendly messages
//!
//! # Configuration
//!
//! Runtime settings come from the environment (see `itemgate::config`);
//! CLI arguments cover inputs that identify this deployment: the account
//! file, the database path, and the transport kind.

mod error;
mod logging;

use clap::{Parser, Subcommand, ValueEnum};
use error::CliError;
use itemgate::accounts;
use itemgate::config::Config;
use itemgate::coordinator::InspectCoordinator;
use itemgate::fleet::WorkerManager;
use itemgate::server;
use itemgate::store::AssetStore;
use itemgate::transport::{SimulatedFactory, TransportFactory};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ============================================================================
// CLI Argument Definitions
// ============================================================================

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportKind {
    /// Deterministic in-process transport for development and testing.
    Simulated,
}

#[derive(Parser)]
#[command(name = "itemgate")]
#[command(version = itemgate::VERSION)]
#[command(about = "Inspection gateway for CS2 in-game items", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway: bot fleet plus HTTP server
    Serve {
        /// Account credential file, one username:password per line
        #[arg(long, default_value = "accounts.txt")]
        accounts: String,

        /// SQLite database path for assets and history
        #[arg(long, default_value = "itemgate.db")]
        database: String,

        /// Listen port (overrides the PORT environment variable)
        #[arg(long)]
        port: Option<u16>,

        /// Directory for daily-rotated log files (console-only when omitted)
        #[arg(long)]
        log_dir: Option<String>,

        /// Game transport implementation
        #[arg(long, value_enum, default_value = "simulated")]
        transport: TransportKind,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            accounts,
            database,
            port,
            log_dir,
            transport,
        } => run_serve(accounts, database, port, log_dir, transport).await,
    };

    if let Err(e) = result {
        e.exit();
    }
}

// ============================================================================
// Serve
// ============================================================================

async fn run_serve(
    accounts_path: String,
    database_path: String,
    port: Option<u16>,
    log_dir: Option<String>,
    transport: TransportKind,
) -> Result<(), CliError> {
    let _guard = logging::init(log_dir.as_deref().map(std::path::Path::new))
        .map_err(|e| CliError::Config(format!("cannot initialize logging: {}", e)))?;

    let mut config = Config::from_env().map_err(|e| CliError::Config(e.to_string()))?;
    if let Some(port) = port {
        config.server.port = port;
    }

    let all_accounts = accounts::load_credentials(&accounts_path)
        .map_err(|e| CliError::Accounts(e.to_string()))?;
    let blacklist = accounts::load_blacklist(&config.accounts.blacklist_path);
    let fleet_accounts = accounts::apply_blacklist(all_accounts, &blacklist);
    if fleet_accounts.is_empty() {
        return Err(CliError::Accounts(format!(
            "no usable accounts in {} (blacklist removed the rest)",
            accounts_path
        )));
    }

    std::fs::create_dir_all(&config.transport.session_path)
        .map_err(|e| CliError::Config(format!("cannot create session directory: {}", e)))?;

    println!("ItemGate v{}", itemgate::VERSION);
    println!("========================");
    println!();
    println!("Accounts:  {} usable / {} blacklisted", fleet_accounts.len(), blacklist.len());
    println!("Database:  {}", database_path);
    println!("Port:      {}", config.server.port);
    println!(
        "Workers:   {}",
        if config.fleet.worker_enabled {
            "sharded threads"
        } else {
            "single shard"
        }
    );
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let store = AssetStore::open(&database_path)
        .await
        .map_err(|e| CliError::Store(e.to_string()))?;

    let factory: Arc<dyn TransportFactory> = match transport {
        TransportKind::Simulated => Arc::new(SimulatedFactory::new()),
    };

    let fleet = WorkerManager::spawn(fleet_accounts, factory, &config);
    let coordinator = InspectCoordinator::new(store, Arc::clone(&fleet), config.gateway.allow_refresh);

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received; shutting down");
            signal_shutdown.cancel();
        }
    });

    server::serve(coordinator, config.server.port, shutdown.clone())
        .await
        .map_err(|e| CliError::Serve(e.to_string()))?;

    shutdown.cancel();
    fleet.shutdown().await;
    warn!("Gateway stopped");
    println!("Gateway stopped.");
    Ok(())
}
