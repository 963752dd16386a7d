//! `watch`: the full terminal loop
//!
//! Runs the reachability probe, drains the queue on every reconnect and
//! follows the live channel (or the polling fallback) until Ctrl-C.

use crate::channel::{ChannelManager, ConnectionState, LiveMessage, WebSocketTransport};
use crate::cli::context::AppContext;
use crate::connectivity::{ConnectivityMonitor, ReachabilityProbe};
use crate::sync::OfflineSync;
use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Args)]
pub struct WatchArgs {
    /// Subscription key to follow (repeatable), e.g. a batch or station id
    #[arg(long = "subscribe", value_name = "KEY")]
    pub keys: Vec<String>,
}

pub async fn watch_command(ctx: &AppContext, args: WatchArgs) -> Result<()> {
    let sync_config = ctx.config.sync_config();
    let backend = ctx.backend()?;
    let queue = ctx.open_queue().await?;

    // Offline until the first probe says otherwise, so a non-empty queue
    // drains as soon as the backend answers
    let monitor = ConnectivityMonitor::new(false);
    let sync = OfflineSync::new(queue, backend.clone(), monitor.clone());

    let drain_listeners = sync.attach();
    let status_listeners = monitor.setup_network_listeners(
        || println!("{} {}", "●".bright_green(), "Backend reachable".bright_green()),
        || println!("{} {}", "●".bright_red(), "Backend unreachable, queueing actions".bright_red()),
    );
    let probe = ReachabilityProbe::new(monitor.clone(), backend.clone(), sync_config.probe_interval).spawn();

    let url = ctx.config.channel_url();
    let refresh = backend.refresh_fn(|data| {
        println!("{} {}", "[poll]".dimmed(), data);
    });
    let options = sync_config.channel_options()?;
    let backoff_ceiling = options.backoff.max_delay();
    let poll_interval = options.poll_interval;
    let transport = WebSocketTransport::new(url.clone()).with_handshake_timeout(ctx.config.channel.handshake_timeout());
    let channel = ChannelManager::spawn(Arc::new(transport), refresh, options);
    for key in &args.keys {
        channel.subscribe(key.clone());
    }

    let mut messages = channel.messages();
    let mut state = channel.state();
    channel.connect();

    println!("  Watching {} (Ctrl-C to stop)", url.cyan());
    println!(
        "  {}",
        format!(
            "Reconnects back off up to {:?}, polling every {:?} while down",
            backoff_ceiling, poll_interval
        )
        .dimmed()
    );
    if let Ok(pending) = sync.pending_count().await {
        if pending > 0 {
            println!("  {} actions waiting to sync", pending.to_string().bright_yellow());
        }
    }

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                print_state(current);
            }
            received = messages.recv() => match received {
                Ok(message) => print_message(&message),
                Err(RecvError::Lagged(skipped)) => warn!("Console fell behind, skipped {} live messages", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Shutting down watch");
    channel.disconnect().await;
    probe.stop();
    drain_listeners.teardown();
    status_listeners.teardown();
    let leftover = monitor.listener_count();
    if leftover > 0 {
        warn!("{} connectivity listeners still registered after shutdown", leftover);
    }

    let pending = sync.pending_count().await?;
    if pending > 0 {
        println!("  {} actions still waiting to sync", pending.to_string().bright_yellow());
    }
    Ok(())
}

fn print_state(state: ConnectionState) {
    let label = state.to_string();
    let label = match state {
        ConnectionState::Open => label.bright_green(),
        ConnectionState::Connecting => label.bright_yellow(),
        ConnectionState::Closed => label.bright_red(),
        ConnectionState::Idle | ConnectionState::Stopped => label.dimmed(),
    };
    println!("{} live channel {}", "●".bright_white(), label);
}

fn print_message(message: &LiveMessage) {
    let key = message.key.as_deref().unwrap_or("-");
    let data = serde_json::Value::Object(message.data.clone());
    println!("{} {} {}", message.kind.bright_cyan().bold(), key.yellow(), data);
}
