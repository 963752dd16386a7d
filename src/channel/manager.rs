//! Tokio driver for the channel state machine
//!
//! One task per channel owns the [`ChannelMachine`], the live connection, the
//! reconnect timer and the polling interval. Everything else talks to it
//! through a cloneable [`ChannelHandle`].

use super::backoff::BackoffTable;
use super::machine::{ChannelEvent, ChannelMachine, ConnectionState, Effect};
use super::messages::LiveMessage;
use super::transport::{Transport, TransportConnection, TransportEvent};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use serde_json::json;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};

/// Shortest polling period the driver will run
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// REST refresh used while the channel is down
pub type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Tuning for a channel
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub backoff: BackoffTable,
    pub poll_interval: Duration,
    /// Capacity of the broadcast buffer for delivered messages
    pub message_buffer: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffTable::default(),
            poll_interval: Duration::from_secs(10),
            message_buffer: 256,
        }
    }
}

enum Command {
    Connect,
    Subscribe(String),
    Unsubscribe(String),
    Subscriptions(oneshot::Sender<Vec<String>>),
    Disconnect(oneshot::Sender<()>),
}

/// Cloneable handle to a running channel
#[derive(Clone)]
pub struct ChannelHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    messages: broadcast::Sender<LiveMessage>,
}

impl ChannelHandle {
    /// Start connecting. Only the first call has any effect.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Track `key`; announced now if open, and after every reconnect
    pub fn subscribe(&self, key: impl Into<String>) {
        let _ = self.commands.send(Command::Subscribe(key.into()));
    }

    pub fn unsubscribe(&self, key: impl Into<String>) {
        let _ = self.commands.send(Command::Unsubscribe(key.into()));
    }

    /// Currently tracked subscription keys, sorted
    pub async fn subscriptions(&self) -> Vec<String> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Subscriptions(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Tear the channel down
    ///
    /// Resolves once the reconnect timer and polling interval are cleared and
    /// the transport is closed. Further commands are ignored.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receive every message delivered after this call
    pub fn messages(&self) -> broadcast::Receiver<LiveMessage> {
        self.messages.subscribe()
    }
}

pub struct ChannelManager;

impl ChannelManager {
    /// Spawn the channel task in the `Idle` state
    ///
    /// Call [`ChannelHandle::connect`] to start connecting. Subscriptions
    /// registered before then are announced on the first open.
    pub fn spawn(transport: Arc<dyn Transport>, refresh: RefreshFn, options: ChannelOptions) -> ChannelHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (messages_tx, _) = broadcast::channel(options.message_buffer.max(1));
        if options.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                "Poll interval {:?} is too short, using {:?}",
                options.poll_interval, MIN_POLL_INTERVAL
            );
        }

        let driver = Driver {
            machine: ChannelMachine::new(options.backoff),
            transport,
            refresh,
            poll_interval: options.poll_interval.max(MIN_POLL_INTERVAL),
            connection: None,
            transport_events: None,
            reconnect: None,
            polling: None,
            refresh_task: None,
            state_tx,
            messages: messages_tx.clone(),
            commands: commands_rx,
        };
        tokio::spawn(driver.run());

        ChannelHandle {
            commands: commands_tx,
            state: state_rx,
            messages: messages_tx,
        }
    }
}

struct Driver {
    machine: ChannelMachine,
    transport: Arc<dyn Transport>,
    refresh: RefreshFn,
    poll_interval: Duration,
    connection: Option<Box<dyn TransportConnection>>,
    transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    reconnect: Option<Pin<Box<Sleep>>>,
    polling: Option<Interval>,
    refresh_task: Option<JoinHandle<()>>,
    state_tx: watch::Sender<ConnectionState>,
    messages: broadcast::Sender<LiveMessage>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => self.dispatch(ChannelEvent::Connect),
                    Some(Command::Subscribe(key)) => self.dispatch(ChannelEvent::Subscribe(key)),
                    Some(Command::Unsubscribe(key)) => self.dispatch(ChannelEvent::Unsubscribe(key)),
                    Some(Command::Subscriptions(reply)) => {
                        let _ = reply.send(self.machine.subscriptions());
                    }
                    Some(Command::Disconnect(ack)) => {
                        self.dispatch(ChannelEvent::Disconnect);
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        // Every handle dropped
                        self.dispatch(ChannelEvent::Disconnect);
                        break;
                    }
                },
                event = next_transport_event(&mut self.transport_events) => {
                    let event = match event {
                        TransportEvent::Opened => ChannelEvent::TransportOpened,
                        TransportEvent::Message(text) => ChannelEvent::TransportMessage(text),
                        TransportEvent::Error(reason) | TransportEvent::Closed(Some(reason)) => {
                            ChannelEvent::TransportClosed { reason: Some(reason) }
                        }
                        TransportEvent::Closed(None) => ChannelEvent::TransportClosed { reason: None },
                    };
                    self.dispatch(event);
                }
                _ = reconnect_due(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.dispatch(ChannelEvent::ReconnectDue);
                }
                _ = poll_due(&mut self.polling) => self.refresh_now(),
            }
        }
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        debug!("Channel task finished");
    }

    /// Feed an event through the machine, applying effects until quiet
    fn dispatch(&mut self, event: ChannelEvent) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            for effect in self.machine.handle(event) {
                if let Some(follow_up) = self.apply(effect) {
                    pending.push_back(follow_up);
                }
            }
        }
    }

    fn apply(&mut self, effect: Effect) -> Option<ChannelEvent> {
        match effect {
            Effect::OpenTransport => {
                let (tx, rx) = mpsc::unbounded_channel();
                match self.transport.open(tx) {
                    Ok(connection) => {
                        self.connection = Some(connection);
                        self.transport_events = Some(rx);
                    }
                    Err(e) => {
                        warn!("Failed to start live connection: {}", e);
                        return Some(ChannelEvent::TransportClosed {
                            reason: Some(e.to_string()),
                        });
                    }
                }
            }
            Effect::CloseTransport => {
                if let Some(mut connection) = self.connection.take() {
                    connection.close();
                }
                self.transport_events = None;
            }
            Effect::Send(text) => match &self.connection {
                Some(connection) if connection.is_ready() => {
                    if let Err(e) = connection.send(&text) {
                        warn!("Failed to send on live channel: {}", e);
                    }
                }
                _ => debug!("Live channel not ready, not sending {}", text),
            },
            Effect::Deliver(message) => {
                // No receivers is fine
                let _ = self.messages.send(message);
            }
            Effect::StartPolling => {
                let mut interval = tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.polling = Some(interval);
                debug!("Polling fallback started every {:?}", self.poll_interval);
            }
            Effect::StopPolling => {
                self.polling = None;
                debug!("Polling fallback stopped");
            }
            Effect::ScheduleReconnect(delay) => {
                self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Effect::CancelReconnect => {
                self.reconnect = None;
            }
            Effect::StateChanged(state) => {
                self.state_tx.send_replace(state);
                info!(
                    "{}",
                    json!({
                        "event": "channel_state",
                        "state": state.to_string(),
                        "reconnect_attempt": self.machine.reconnect_attempt(),
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                    })
                );
            }
        }
        None
    }

    fn refresh_now(&mut self) {
        if self.refresh_task.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Previous refresh still running, skipping tick");
            return;
        }
        let refresh = (self.refresh)();
        self.refresh_task = Some(tokio::spawn(async move {
            if let Err(e) = refresh.await {
                warn!("Polling refresh failed: {:#}", e);
            }
        }));
    }
}

async fn next_transport_event(events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>) -> TransportEvent {
    let Some(rx) = events.as_mut() else {
        return std::future::pending().await;
    };
    match rx.recv().await {
        Some(event) => event,
        None => {
            // Transport went away without saying goodbye
            *events = None;
            TransportEvent::Closed(Some("transport event stream ended".to_string()))
        }
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn poll_due(interval: &mut Option<Interval>) {
    match interval.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
