use anyhow::{Context, Result};
use clap::Parser;
use floor_sync::cli::{self, Cli};
use floor_sync::config::AppConfig;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger to file (truncate on each run)
    let log_path = match &cli.log_file {
        Some(path) => path.clone(),
        None => AppConfig::default_log_path()?,
    };
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();

    info!("Starting floor-sync {}", env!("CARGO_PKG_VERSION"));
    cli::run(cli).await
}
