pub mod app;
pub mod commands;
pub mod context;

pub use app::{Cli, Commands};
pub use context::AppContext;

use anyhow::Result;
use log::info;

/// Dispatch a parsed command line
pub async fn run(cli: Cli) -> Result<()> {
    let ctx = AppContext::load(cli.config, cli.ephemeral)?;
    info!("Using config {:?}", ctx.config_path);

    match cli.command {
        Commands::Queue(cmd) => commands::queue_command(&ctx, cmd).await,
        Commands::Enqueue(cmd) => commands::enqueue_command(&ctx, cmd).await,
        Commands::Submit(cmd) => commands::submit_command(&ctx, cmd).await,
        Commands::Watch(args) => commands::watch_command(&ctx, args).await,
        Commands::Config(cmd) => commands::config_command(&ctx, cmd).await,
    }
}
