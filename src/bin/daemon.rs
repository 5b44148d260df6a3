//! cursor-syncd - the long-running sync daemon.
//!
//! Loads configuration, validates the Cursor installation and token,
//! then runs the sync orchestrator until interrupted.

use clap::Parser;
use cursor_sync::auth;
use cursor_sync::config::Config;
use cursor_sync::detect::Detector;
use cursor_sync::github::GithubClient;
use cursor_sync::{logging, Daemon, Syncer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Keep Cursor IDE settings synchronized with a private Git repository.
#[derive(Parser, Debug)]
#[command(name = "cursor-syncd")]
#[command(about = "Cursor settings sync daemon", long_about = None)]
struct Args {
    /// Path to the config file (default: ~/.cursor-sync/config.yaml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write a default config file if none exists, then exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if args.init_config {
        Config::write_default(&config_path)?;
        println!("wrote default config to {}", config_path.display());
        return Ok(());
    }

    let config = Arc::new(Config::load(&config_path)?);
    logging::init(&config.logging)?;

    // Precondition checks: a usable Cursor installation and a stored token.
    Detector::new(&config.cursor.config_path).detect_and_validate()?;
    let token = match auth::load_token() {
        Ok(token) => token,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };
    match GithubClient::new(Some(token.clone())).verify_token().await {
        Ok(login) => info!(
            "token {} verified for user {}",
            auth::mask(&token),
            login
        ),
        Err(e) => {
            error!("token verification failed: {}", e);
            return Err(e.into());
        }
    }

    let syncer = Arc::new(Syncer::new(config.clone(), token)?);
    let daemon = Arc::new(Daemon::new(
        config.clone(),
        syncer,
        Config::app_home()?,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner = {
        let daemon = daemon.clone();
        tokio::spawn(async move { daemon.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    let _ = shutdown_tx.send(true);
    runner.await?;

    Ok(())
}
