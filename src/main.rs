//! --- minerwatch CLI ---
//! Replays recorded risk datapoints and violation flags into an in-memory
//! store and prints one page of the miner leaderboard as JSON.

use clap::{Parser, Subcommand};
use minerwatch::{
    config::{Config, ConfigError},
    dashboard::{DatapointEntry, ViolationFlag},
    MinerDashboard, MinersQuery, RankingError, SortBy, SortOrder, StorageError,
};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Error)]
enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Ranking failed: {0}")]
    Ranking(#[from] RankingError),
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Malformed JSON in '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "Miner risk leaderboard tooling.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file.
    InitConfig {
        #[arg(short, long, value_name = "FILE", default_value = "minerwatch.toml")]
        config: PathBuf,
    },
    /// Replay datapoints and print a ranked page.
    Rank {
        #[arg(short, long, value_name = "FILE", default_value = "minerwatch.toml")]
        config: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        datapoints: PathBuf,
        #[arg(long, value_name = "FILE")]
        violations: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long)]
        page_size: Option<usize>,
        #[arg(long)]
        order_by: Option<SortBy>,
        #[arg(long)]
        sort_order: Option<SortOrder>,
    },
}

fn initialize_logging(level: &str) {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set up logging subscriber.");
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, CliError> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CliError::Json {
        path: display,
        source,
    })
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig { config } => {
            initialize_logging("info");
            let path = config.display().to_string();
            Config::default().save(&path)?;
            info!("Default configuration written to '{}'.", path);
        }
        Commands::Rank {
            config,
            datapoints,
            violations,
            page,
            page_size,
            order_by,
            sort_order,
        } => {
            let config = Config::load(&config.display().to_string())?;
            initialize_logging(&config.logging.level);

            let query = MinersQuery {
                page,
                page_size,
                order_by,
                sort_order,
            };
            run_rank(&config, &datapoints, violations.as_deref(), &query).await?;
        }
    }

    Ok(())
}

async fn run_rank(
    config: &Config,
    datapoints: &Path,
    violations: Option<&Path>,
    query: &MinersQuery,
) -> Result<(), CliError> {
    let (dashboard, store) = MinerDashboard::in_memory(config);

    let entries: Vec<DatapointEntry> = read_json(datapoints)?;
    dashboard.replay_datapoints(&entries).await?;
    info!(
        datapoints = entries.len(),
        miners = store.miner_count(),
        "Datapoints replayed"
    );

    if let Some(path) = violations {
        let flags: Vec<ViolationFlag> = read_json(path)?;
        dashboard.replay_violations(&flags).await?;
        info!(flags = flags.len(), "Violation flags applied");
    }

    let page = dashboard.miners(query).await?;
    let rendered = serde_json::to_string_pretty(&page).map_err(|source| CliError::Json {
        path: "<stdout>".to_string(),
        source,
    })?;
    println!("{rendered}");
    Ok(())
}
