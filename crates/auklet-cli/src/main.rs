mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, QueueCommand};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, store } => commands::run(config, store, cli.db_url).await,
        Command::ManualRepair { config, input } => {
            commands::manual_repair(config, input).await
        }
        Command::Queue { command } => match command {
            QueueCommand::Stat => commands::queue_stat(cli.db_url).await,
            QueueCommand::Count => commands::queue_count(cli.db_url).await,
        },
    }
}
