//! tkkt: offline-first ticketing replicas that converge.
//!
//! Run scenarios that show replicas editing while disconnected and then
//! reconciling through Merkle digests until every view is identical.

mod display;
mod scenarios;

use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use tkkt_core::Dataset;
use tkkt_db::StoreConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tkkt")]
#[command(about = "Local-first ticketing replicas with HLC stamped change logs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Two doors edit offline, then sync
    Demo,
    /// Concurrent renames of one event merged in different orders
    Conflict,
    /// Split venue with independent edits, then heal
    Partition,
    /// Random edits and random pairwise reconciliation
    Stress {
        /// Number of replicas
        #[arg(short, long, default_value_t = 4)]
        replicas: usize,
        /// Edits per replica
        #[arg(short, long, default_value_t = 100)]
        edits: usize,
        /// Random pairwise syncs
        #[arg(short, long, default_value_t = 40)]
        syncs: usize,
        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
        /// Also run the scaling analysis up to this many replicas
        #[arg(long)]
        scale_to: Option<usize>,
    },
    /// Show a row and its narrated history from a replica on disk
    History {
        /// SQLite file of the replica
        db: PathBuf,
        /// Dataset name, e.g. events or students
        dataset: String,
        /// Row id
        id: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "tkkt starting");
    let rt = tokio::runtime::Runtime::new().unwrap();
    if let Err(e) = rt.block_on(async_main(cli.command.unwrap_or(Commands::Demo))) {
        eprintln!("{} {}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}

async fn async_main(command: Commands) -> tkkt_db::Result<()> {
    match command {
        Commands::Demo => scenarios::run_demo().await,
        Commands::Conflict => scenarios::run_conflict().await,
        Commands::Partition => scenarios::run_partition().await,
        Commands::Stress {
            replicas,
            edits,
            syncs,
            seed,
            scale_to,
        } => {
            let stats = stress_test::stress_test_replicas(replicas, edits, syncs, seed).await?;
            stats.print();
            if let Some(max) = scale_to {
                stress_test::stress_test_scaling(max, 2, seed).await?;
            }
            Ok(())
        }
        Commands::History { db, dataset, id } => {
            let dataset: Dataset = dataset.parse()?;
            let config = StoreConfig::builder().path(db).build();
            scenarios::run_history(config, dataset, &id).await
        }
    }
}
