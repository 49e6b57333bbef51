//! # Context Cache CLI (`ctxcache`)
//!
//! ## Usage
//!
//! ```bash
//! ctxcache --config ./ctxcache.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctxcache run` | Watch the workspace and keep the engine's prefix cache primed |
//! | `ctxcache scan` | Index the workspace once and print the tiers |
//! | `ctxcache render` | Print the assembled context document |
//! | `ctxcache health` | Check the inference engine |
//!
//! Without `--config`, defaults apply and the `WATCH_DIR`, `VLLM_ENDPOINT`,
//! `WATCH_INTERVAL`, ... environment variables still override them.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use context_cache::{config, logging, report, service};

/// Context Cache: keeps an inference engine's prefix cache warm with a
/// stable, ranked snapshot of a workspace.
#[derive(Parser)]
#[command(
    name = "ctxcache",
    about = "Context Cache: keeps an inference engine's prefix cache warm with your workspace",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Watch the workspace and prime the engine on every change.
    ///
    /// Waits for the engine, scans the workspace, primes the engine, then
    /// refreshes after each burst of edits. Stops on Ctrl-C after a final
    /// flush.
    Run,

    /// Index the workspace once and print the tier listing.
    Scan {
        /// Emit JSON instead of the text report.
        #[arg(long)]
        json: bool,
    },

    /// Print the assembled context document to stdout.
    Render,

    /// Check the engine's `/health` and `/v1/models`.
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(cli.config.as_deref())?;
    logging::init_subscriber(&cfg.logging.level, cfg.logging.json);

    match cli.command {
        Commands::Run => {
            service::run_service(&cfg).await?;
        }
        Commands::Scan { json } => {
            report::run_scan(&cfg, json)?;
        }
        Commands::Render => {
            report::run_render(&cfg)?;
        }
        Commands::Health => {
            if !report::run_health(&cfg).await? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
