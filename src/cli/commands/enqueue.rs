//! `enqueue` and the action arguments shared with `submit`

use crate::cli::context::AppContext;
use crate::queue::{CompletePayload, ProcessResult, QueuedAction, StartPayload};
use anyhow::Result;
use clap::{Args, Subcommand};
use colored::*;
use log::info;
use serde_json::{Map, Value};

#[derive(Args)]
pub struct ActionCommands {
    #[command(subcommand)]
    pub command: ActionSubcommands,
}

#[derive(Subcommand)]
pub enum ActionSubcommands {
    /// Start a process step on a WIP item
    Start {
        /// Scanned WIP item id
        #[arg(long)]
        wip: String,
        /// Process step id
        #[arg(long)]
        process: String,
        /// Operator id
        #[arg(long)]
        worker: String,
    },
    /// Complete a process step on a WIP item
    Complete {
        #[arg(long)]
        wip: String,
        #[arg(long)]
        process: String,
        #[arg(long)]
        worker: String,
        /// pass or fail
        #[arg(long)]
        result: ProcessResult,
        /// Measurement as key=value; numbers and booleans are kept as such
        #[arg(long = "measurement", value_name = "KEY=VALUE", value_parser = parse_measurement)]
        measurements: Vec<(String, Value)>,
        #[arg(long)]
        notes: Option<String>,
    },
}

impl ActionSubcommands {
    pub fn into_action(self) -> QueuedAction {
        match self {
            ActionSubcommands::Start { wip, process, worker } => QueuedAction::Start(StartPayload {
                wip_id: wip,
                process_id: process,
                worker_id: worker,
            }),
            ActionSubcommands::Complete {
                wip,
                process,
                worker,
                result,
                measurements,
                notes,
            } => {
                let measurement_data = if measurements.is_empty() {
                    None
                } else {
                    Some(Value::Object(measurements.into_iter().collect::<Map<_, _>>()))
                };
                QueuedAction::Complete(CompletePayload {
                    wip_id: wip,
                    process_id: process,
                    worker_id: worker,
                    result,
                    measurement_data,
                    notes,
                })
            }
        }
    }
}

fn parse_measurement(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("measurement '{}' has an empty key", raw));
    }
    // Bare words that are not valid JSON stay strings
    let value = serde_json::from_str::<Value>(value.trim())
        .ok()
        .filter(|v| v.is_number() || v.is_boolean())
        .unwrap_or_else(|| Value::String(value.trim().to_string()));
    Ok((key.to_string(), value))
}

pub async fn enqueue_command(ctx: &AppContext, cmd: ActionCommands) -> Result<()> {
    let action = cmd.command.into_action();
    info!("Queueing {} for {}", action.operation_type(), action.wip_id());

    let queue = ctx.open_queue().await?;
    let operation = action.operation_type();
    let wip = action.wip_id().to_string();
    let id = queue.enqueue(action).await?;

    println!(
        "{} Queued {} for {} as {}",
        "✓".bright_green().bold(),
        operation.to_string().bright_white().bold(),
        wip.cyan(),
        id.dimmed()
    );
    Ok(())
}
