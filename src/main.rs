use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvester::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "harvester",
    version,
    about = "Social media harvester with proxy and account rotation",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect posts through the rotating resource pool
    Harvest {
        /// Search keyword (a default keyword is used when omitted)
        #[arg(short, long)]
        keyword: Option<String>,

        /// Maximum number of items to collect
        #[arg(short, long)]
        max_items: Option<usize>,
    },

    /// Show rotation state of every resource
    Status {
        /// Print the snapshot as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Put an invalidated resource back into rotation
    Restore {
        /// Resource id
        id: String,
    },

    /// Remove a stale state lock left by a crashed process
    Unlock,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(Some(cli.config.as_path()))?;

    // Initialize tracing/logging
    let format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(format, &config.logging.level, cli.verbose)?;

    tracing::info!(config = %cli.config.display(), "harvester starting");

    match cli.command {
        Commands::Harvest { keyword, max_items } => {
            tracing::info!(
                keyword = ?keyword,
                max_items = ?max_items,
                "Starting harvest command"
            );
            commands::harvest(config, keyword, max_items).await?;
        }

        Commands::Status { json } => {
            commands::status(config, json).await?;
        }

        Commands::Restore { id } => {
            tracing::info!(resource = %id, "Starting restore command");
            commands::restore(config, id).await?;
        }

        Commands::Unlock => {
            commands::unlock(config).await?;
        }
    }

    tracing::info!("harvester completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("harvester=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("harvester={level},warn")))
    };

    // Items go to stdout, logs to stderr
    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }

    Ok(())
}
