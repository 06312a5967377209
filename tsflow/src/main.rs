// tsflow/src/main.rs

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Setup Logging (Tracing)
    // RUST_LOG=debug tsflow run ... to see per-variable details
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            input,
            storage_root,
            ancillary,
        } => commands::run::execute(config, input, storage_root, ancillary).await,
        Commands::Validate { config } => commands::validate::execute(config),
        Commands::Inspect { input, variable } => commands::inspect::execute(input, variable),
        Commands::Handlers => commands::handlers::execute(),
    }
}
