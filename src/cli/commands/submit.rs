use super::enqueue::ActionCommands;
use crate::cli::context::AppContext;
use crate::connectivity::ConnectivityMonitor;
use crate::sync::{OfflineSync, SubmitOutcome};
use anyhow::Result;
use colored::*;
use log::info;

pub async fn submit_command(ctx: &AppContext, cmd: ActionCommands) -> Result<()> {
    let action = cmd.command.into_action();
    let operation = action.operation_type();
    let wip = action.wip_id().to_string();

    let backend = ctx.backend()?;
    let online = backend.health_check().await;
    info!("Backend reachable: {}", online);

    let sync = OfflineSync::new(ctx.open_queue().await?, backend, ConnectivityMonitor::new(online));
    match sync.submit_or_enqueue(action).await? {
        SubmitOutcome::Submitted => {
            println!(
                "{} {} for {} accepted by the backend",
                "✓".bright_green().bold(),
                operation.to_string().bright_white().bold(),
                wip.cyan()
            );
        }
        SubmitOutcome::Queued { id } => {
            let reason = if online { "was not accepted" } else { "backend unreachable" };
            println!(
                "{} {} for {} queued as {} ({})",
                "⚠".bright_yellow().bold(),
                operation.to_string().bright_white().bold(),
                wip.cyan(),
                id.dimmed(),
                reason
            );
            println!(
                "  {} pending in total",
                sync.pending_count().await?.to_string().bright_yellow()
            );
        }
    }
    Ok(())
}
