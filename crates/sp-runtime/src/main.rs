//! Process entry point.
//!
//! Thin by design: parse the CLI, load layered configuration, connect to
//! the database, start the runtime, wait for shutdown. Everything
//! interesting lives in `app.rs`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use sp_runtime::App;

#[derive(Parser)]
#[command(name = "sp-trader", about = "Automated equity-trading core")]
struct Cli {
    /// Configuration layers, merged in order (later overrides earlier).
    #[arg(long, global = true)]
    config: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the trading runtime until interrupted.
    Run,
    /// Apply database migrations and exit.
    Migrate,
    /// Print connectivity and backlog status.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();
    let loaded = load_config(&cli.config)?;
    info!(config_hash = %loaded.config_hash, "configuration loaded");

    match cli.command {
        Command::Migrate => {
            let pool = sp_db::connect_from_env().await?;
            sp_db::migrate(&pool).await?;
            info!("migrations applied");
        }
        Command::Status => {
            let pool = sp_db::connect_from_env().await?;
            let status = sp_db::status(&pool).await?;
            let pending = if status.has_orders_table {
                sp_db::outbox::pending_count(&pool).await?
            } else {
                0
            };
            println!(
                "db ok: {}, schema present: {}, outbox pending: {}",
                status.ok, status.has_orders_table, pending
            );
        }
        Command::Run => {
            let pool = sp_db::connect_from_env().await?;
            sp_db::migrate(&pool).await?;

            let app = App::start(loaded.config, pool).await?;

            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
            info!("shutdown signal received");
            app.shutdown();
        }
    }

    Ok(())
}

fn load_config(paths: &[String]) -> Result<sp_config::LoadedConfig> {
    if paths.is_empty() {
        return Ok(sp_config::LoadedConfig {
            config: sp_config::defaults(),
            canonical_json: "{}".to_string(),
            config_hash: "defaults".to_string(),
        });
    }
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    sp_config::load_layered(&refs)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
