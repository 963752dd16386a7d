use crate::cli::context::AppContext;
use crate::connectivity::ConnectivityMonitor;
use crate::queue::{DrainSummary, QueueItem};
use crate::sync::OfflineSync;
use anyhow::Result;
use clap::{Args, Subcommand};
use colored::*;
use dialoguer::Confirm;
use is_terminal::IsTerminal;
use log::info;

#[derive(Args)]
pub struct QueueCommands {
    #[command(subcommand)]
    pub command: QueueSubcommands,
}

#[derive(Subcommand)]
pub enum QueueSubcommands {
    /// List pending actions, oldest first
    List,
    /// Show how many actions are pending
    Count,
    /// Delete every pending action
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Submit pending actions to the backend now
    Drain,
}

pub async fn queue_command(ctx: &AppContext, cmd: QueueCommands) -> Result<()> {
    match cmd.command {
        QueueSubcommands::List => list_command(ctx).await,
        QueueSubcommands::Count => count_command(ctx).await,
        QueueSubcommands::Clear { yes } => clear_command(ctx, yes).await,
        QueueSubcommands::Drain => drain_command(ctx).await,
    }
}

async fn list_command(ctx: &AppContext) -> Result<()> {
    let queue = ctx.open_queue().await?;
    let items = queue.list_pending().await?;

    if items.is_empty() {
        println!("  {}", "No pending actions".bright_green());
        return Ok(());
    }

    println!();
    println!(
        "  {:<24} {:<9} {:<16} {:<20} {}",
        "ID".bold(),
        "TYPE".bold(),
        "WIP".bold(),
        "QUEUED AT".bold(),
        "RETRIES".bold()
    );
    for item in &items {
        println!("  {}", describe(item));
    }
    println!();
    println!("  Total pending: {}", items.len().to_string().bright_white().bold());
    Ok(())
}

fn describe(item: &QueueItem) -> String {
    let retries = format!("{}/{}", item.retry_count, item.max_retries);
    let retries = if item.is_last_attempt() {
        retries.bright_red().to_string()
    } else if item.retry_count > 0 {
        retries.bright_yellow().to_string()
    } else {
        retries
    };
    format!(
        "{:<24} {:<9} {:<16} {:<20} {}",
        item.id,
        item.operation_type().to_string(),
        item.action.wip_id(),
        item.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        retries
    )
}

async fn count_command(ctx: &AppContext) -> Result<()> {
    let queue = ctx.open_queue().await?;
    println!("{}", queue.count().await?);
    Ok(())
}

async fn clear_command(ctx: &AppContext, yes: bool) -> Result<()> {
    let queue = ctx.open_queue().await?;
    let pending = queue.count().await?;
    if pending == 0 {
        println!("  {}", "Queue is already empty".bright_green());
        return Ok(());
    }

    if !yes {
        if !std::io::stdin().is_terminal() {
            anyhow::bail!("Refusing to clear {} pending actions without --yes", pending);
        }
        let confirm = Confirm::new()
            .with_prompt(format!("Discard {} pending actions? They will never reach the backend", pending))
            .default(false)
            .interact()?;
        if !confirm {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let removed = queue.clear().await?;
    info!("Cleared {} queued actions", removed);
    println!("{} Removed {} pending actions", "✓".bright_green().bold(), removed);
    Ok(())
}

async fn drain_command(ctx: &AppContext) -> Result<()> {
    let queue = ctx.open_queue().await?;
    let backend = ctx.backend()?;
    let sync = OfflineSync::new(queue, backend, ConnectivityMonitor::new(true));

    let progress = |done: usize, total: usize| {
        println!("  {} {}/{}", "→".cyan(), done, total);
    };
    let summary = sync.drain_now(Some(&progress)).await;
    print_summary(&summary);
    Ok(())
}

pub fn print_summary(summary: &DrainSummary) {
    if summary.total == 0 {
        println!("  {}", "Nothing to sync".bright_green());
        return;
    }

    println!(
        "  {} {} of {} actions synced",
        if summary.is_clean() { "✓".bright_green().bold() } else { "⚠".bright_yellow().bold() },
        summary.success_count,
        summary.total
    );
    if summary.retained_count > 0 {
        println!(
            "  {} will be retried later",
            summary.retained_count.to_string().bright_yellow()
        );
    }
    if summary.failed_count > 0 {
        println!(
            "  {} dropped after exhausting their retries",
            summary.failed_count.to_string().bright_red().bold()
        );
    }
}
