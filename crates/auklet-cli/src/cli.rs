use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "auklet",
    about = "Repair coordination for a distributed object storage satellite",
    version
)]
pub struct Cli {
    /// Postgres connection string for the persistent queue and partition
    /// metadata backends.
    #[arg(long, env = "AUKLET_DATABASE_URL", global = true)]
    pub db_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the repair process: change-stream processor, repair dispatcher
    /// and queue statistics chore.
    Run {
        /// Path to the config file.
        #[arg(long, default_value = "auklet.yml")]
        config: PathBuf,

        /// Backend for the repair queue and partition metadata.
        #[arg(long, default_value = "memory")]
        store: StoreArg,
    },

    /// Repair the segments listed in a CSV file, writing outcomes to
    /// sibling .success/.failed files.
    ManualRepair {
        /// Path to the config file.
        #[arg(long, default_value = "auklet.yml")]
        config: PathBuf,

        /// CSV of `stream-id,position` rows.
        input: PathBuf,
    },

    /// Inspect the persistent repair queue.
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreArg {
    Memory,
    Postgres,
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Per-placement aggregates.
    Stat,
    /// Total queued segments.
    Count,
}
