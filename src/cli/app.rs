use super::commands::config::ConfigCommands;
use super::commands::enqueue::ActionCommands;
use super::commands::queue::QueueCommands;
use super::commands::watch::WatchArgs;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "floor-sync")]
#[command(about = "Offline queue and live updates for shop-floor scanning terminals")]
#[command(version)]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file (truncated on each run)
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Keep the queue in memory; nothing is persisted
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and drain the offline queue
    Queue(QueueCommands),
    /// Queue an operator action without contacting the backend
    Enqueue(ActionCommands),
    /// Send an operator action now, queueing it if that fails
    Submit(ActionCommands),
    /// Follow live updates and sync the queue on reconnect
    Watch(WatchArgs),
    /// Configuration management
    Config(ConfigCommands),
}
