//! jumpgate - multi-tenant SSH bastion daemon.

mod app;
mod server;

use clap::{Parser, Subcommand};
use jumpgate_core::{init_logging, Config, Paths};
use std::path::PathBuf;

/// jumpgate command-line interface.
#[derive(Parser)]
#[command(name = "jumpgate")]
#[command(about = "SSH bastion: policy-filtered fleet access, SCP relay, shell fan-out")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Base directory for config and runtime files (default ~/.jumpgate)
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bastion
    Start,
    /// Validate the configuration document and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    let paths = match cli.config_dir {
        Some(dir) => Paths::with_base_dir(dir),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    match cli.command {
        Some(Commands::CheckConfig) => {
            println!("configuration ok: listening on {}", config.listen_addr);
        }
        Some(Commands::Start) | None => {
            app::run_daemon(config, paths).await?;
        }
    }

    Ok(())
}
