//! Connection state machine for a live-update channel
//!
//! The machine is pure: it consumes [`ChannelEvent`]s and answers with the
//! [`Effect`]s the driver must carry out. It owns no timers and no sockets,
//! which keeps every transition and side effect enumerable in tests.

use super::backoff::BackoffTable;
use super::messages::{ChannelCommand, LiveMessage};
use log::{debug, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, `connect` not called yet
    Idle,
    Connecting,
    Open,
    /// Lost the connection; a reconnect is scheduled
    Closed,
    /// Torn down by the owner. Terminal.
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connect,
    TransportOpened,
    TransportMessage(String),
    /// Close, error, or failure to even start connecting
    TransportClosed { reason: Option<String> },
    ReconnectDue,
    Subscribe(String),
    Unsubscribe(String),
    Disconnect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenTransport,
    CloseTransport,
    Send(String),
    Deliver(LiveMessage),
    StartPolling,
    StopPolling,
    ScheduleReconnect(Duration),
    CancelReconnect,
    StateChanged(ConnectionState),
}

#[derive(Debug)]
pub struct ChannelMachine {
    state: ConnectionState,
    reconnect_attempt: u32,
    subscriptions: BTreeSet<String>,
    polling: bool,
    reconnect_scheduled: bool,
    backoff: BackoffTable,
}

impl ChannelMachine {
    pub fn new(backoff: BackoffTable) -> Self {
        Self {
            state: ConnectionState::Idle,
            reconnect_attempt: 0,
            subscriptions: BTreeSet::new(),
            polling: false,
            reconnect_scheduled: false,
            backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn reconnect_scheduled(&self) -> bool {
        self.reconnect_scheduled
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.iter().cloned().collect()
    }

    pub fn handle(&mut self, event: ChannelEvent) -> Vec<Effect> {
        if self.state == ConnectionState::Stopped {
            debug!("Channel stopped, ignoring {:?}", event);
            return Vec::new();
        }

        match event {
            ChannelEvent::Connect => self.on_connect(),
            ChannelEvent::TransportOpened => self.on_opened(),
            ChannelEvent::TransportMessage(text) => self.on_message(&text),
            ChannelEvent::TransportClosed { reason } => self.on_closed(reason),
            ChannelEvent::ReconnectDue => self.on_reconnect_due(),
            ChannelEvent::Subscribe(key) => self.on_subscribe(key),
            ChannelEvent::Unsubscribe(key) => self.on_unsubscribe(key),
            ChannelEvent::Disconnect => self.on_disconnect(),
        }
    }

    fn transition(&mut self, to: ConnectionState, effects: &mut Vec<Effect>) {
        if self.state != to {
            self.state = to;
            effects.push(Effect::StateChanged(to));
        }
    }

    fn on_connect(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Idle {
            debug!("connect() while {}, ignoring", self.state);
            return Vec::new();
        }
        let mut effects = Vec::new();
        self.transition(ConnectionState::Connecting, &mut effects);
        effects.push(Effect::OpenTransport);
        effects
    }

    fn on_opened(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Connecting {
            debug!("Stale open event while {}, ignoring", self.state);
            return Vec::new();
        }

        let mut effects = Vec::new();
        self.reconnect_attempt = 0;
        if self.polling {
            self.polling = false;
            effects.push(Effect::StopPolling);
        }
        self.transition(ConnectionState::Open, &mut effects);
        effects.extend(
            self.subscriptions
                .iter()
                .map(|key| Effect::Send(ChannelCommand::Subscribe(key.clone()).to_text())),
        );
        effects
    }

    fn on_message(&mut self, text: &str) -> Vec<Effect> {
        if self.state != ConnectionState::Open {
            debug!("Dropping message received while {}", self.state);
            return Vec::new();
        }
        match LiveMessage::parse(text) {
            Ok(message) => vec![Effect::Deliver(message)],
            Err(e) => {
                warn!("Dropping malformed live message ({}): {:.200}", e, text);
                Vec::new()
            }
        }
    }

    fn on_closed(&mut self, reason: Option<String>) -> Vec<Effect> {
        if !matches!(self.state, ConnectionState::Connecting | ConnectionState::Open) {
            // Error followed by close from the same transport lands here
            return Vec::new();
        }

        let mut effects = vec![Effect::CloseTransport];
        self.transition(ConnectionState::Closed, &mut effects);

        if !self.polling {
            self.polling = true;
            effects.push(Effect::StartPolling);
        }

        let delay = self.backoff.delay_for(self.reconnect_attempt);
        self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
        self.reconnect_scheduled = true;
        effects.push(Effect::ScheduleReconnect(delay));

        warn!(
            "Live channel closed ({}); reconnect attempt {} in {:?}",
            reason.as_deref().unwrap_or("no reason given"),
            self.reconnect_attempt,
            delay
        );
        effects
    }

    fn on_reconnect_due(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Closed || !self.reconnect_scheduled {
            return Vec::new();
        }
        self.reconnect_scheduled = false;

        let mut effects = Vec::new();
        self.transition(ConnectionState::Connecting, &mut effects);
        effects.push(Effect::OpenTransport);
        effects
    }

    fn on_subscribe(&mut self, key: String) -> Vec<Effect> {
        let announce = self.state == ConnectionState::Open;
        if !self.subscriptions.insert(key.clone()) || !announce {
            return Vec::new();
        }
        vec![Effect::Send(ChannelCommand::Subscribe(key).to_text())]
    }

    fn on_unsubscribe(&mut self, key: String) -> Vec<Effect> {
        let announce = self.state == ConnectionState::Open;
        if !self.subscriptions.remove(&key) || !announce {
            return Vec::new();
        }
        vec![Effect::Send(ChannelCommand::Unsubscribe(key).to_text())]
    }

    fn on_disconnect(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.reconnect_scheduled {
            self.reconnect_scheduled = false;
            effects.push(Effect::CancelReconnect);
        }
        if self.polling {
            self.polling = false;
            effects.push(Effect::StopPolling);
        }
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Open) {
            effects.push(Effect::CloseTransport);
        }
        self.transition(ConnectionState::Stopped, &mut effects);
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed() -> ChannelEvent {
        ChannelEvent::TransportClosed {
            reason: Some("socket reset".to_string()),
        }
    }

    fn open_machine() -> ChannelMachine {
        let mut machine = ChannelMachine::new(BackoffTable::default());
        machine.handle(ChannelEvent::Connect);
        machine.handle(ChannelEvent::TransportOpened);
        machine
    }

    fn count(effects: &[Effect], wanted: &Effect) -> usize {
        effects.iter().filter(|e| *e == wanted).count()
    }

    #[test]
    fn test_connect_opens_transport() {
        let mut machine = ChannelMachine::new(BackoffTable::default());
        let effects = machine.handle(ChannelEvent::Connect);
        assert_eq!(
            effects,
            vec![Effect::StateChanged(ConnectionState::Connecting), Effect::OpenTransport]
        );

        // Second connect is a no-op
        assert!(machine.handle(ChannelEvent::Connect).is_empty());
    }

    #[test]
    fn test_subscription_before_open_announced_once_on_open() {
        let mut machine = ChannelMachine::new(BackoffTable::default());
        assert!(machine.handle(ChannelEvent::Subscribe("batch-1".into())).is_empty());
        assert!(machine.handle(ChannelEvent::Subscribe("batch-1".into())).is_empty());
        machine.handle(ChannelEvent::Connect);

        let effects = machine.handle(ChannelEvent::TransportOpened);
        let announce = Effect::Send(ChannelCommand::Subscribe("batch-1".into()).to_text());
        assert_eq!(count(&effects, &announce), 1);
        assert_eq!(machine.state(), ConnectionState::Open);
    }

    #[test]
    fn test_subscribe_while_open_sends_immediately() {
        let mut machine = open_machine();
        let effects = machine.handle(ChannelEvent::Subscribe("batch-2".into()));
        assert_eq!(
            effects,
            vec![Effect::Send(ChannelCommand::Subscribe("batch-2".into()).to_text())]
        );

        let effects = machine.handle(ChannelEvent::Unsubscribe("batch-2".into()));
        assert_eq!(
            effects,
            vec![Effect::Send(ChannelCommand::Unsubscribe("batch-2".into()).to_text())]
        );

        // Unknown key: nothing to cancel
        assert!(machine.handle(ChannelEvent::Unsubscribe("batch-2".into())).is_empty());
    }

    #[test]
    fn test_close_starts_polling_and_reopen_stops_it() {
        let mut machine = open_machine();

        let effects = machine.handle(closed());
        assert_eq!(count(&effects, &Effect::StartPolling), 1);
        assert!(effects.contains(&Effect::ScheduleReconnect(Duration::from_secs(1))));
        assert_eq!(machine.state(), ConnectionState::Closed);
        assert!(machine.is_polling());

        machine.handle(ChannelEvent::ReconnectDue);
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert!(machine.is_polling());

        let effects = machine.handle(ChannelEvent::TransportOpened);
        assert_eq!(count(&effects, &Effect::StopPolling), 1);
        assert!(!machine.is_polling());
        assert_eq!(machine.reconnect_attempt(), 0);
    }

    #[test]
    fn test_subscriptions_replayed_after_reconnect() {
        let mut machine = open_machine();
        machine.handle(ChannelEvent::Subscribe("batch-1".into()));
        machine.handle(ChannelEvent::Subscribe("batch-2".into()));
        machine.handle(closed());
        machine.handle(ChannelEvent::ReconnectDue);

        let effects = machine.handle(ChannelEvent::TransportOpened);
        let sent: Vec<&Effect> = effects.iter().filter(|e| matches!(e, Effect::Send(_))).collect();
        assert_eq!(sent.len(), 2);
    }

    #[test]
    fn test_consecutive_failures_follow_backoff_table() {
        let mut machine = ChannelMachine::new(BackoffTable::default());
        machine.handle(ChannelEvent::Connect);

        let mut delays = Vec::new();
        for _ in 0..7 {
            for effect in machine.handle(closed()) {
                if let Effect::ScheduleReconnect(delay) = effect {
                    delays.push(delay.as_secs());
                }
            }
            machine.handle(ChannelEvent::ReconnectDue);
        }

        assert_eq!(delays, vec![1, 2, 5, 10, 30, 30, 30]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_duplicate_close_is_idempotent() {
        let mut machine = open_machine();
        let first = machine.handle(closed());
        assert!(!first.is_empty());

        assert!(machine.handle(closed()).is_empty());
        assert_eq!(machine.reconnect_attempt(), 1);
    }

    #[test]
    fn test_polling_started_only_once_across_failures() {
        let mut machine = open_machine();
        let mut starts = 0;
        for _ in 0..3 {
            starts += count(&machine.handle(closed()), &Effect::StartPolling);
            machine.handle(ChannelEvent::ReconnectDue);
        }
        assert_eq!(starts, 1);
    }

    #[test]
    fn test_malformed_message_dropped_connection_kept() {
        let mut machine = open_machine();
        assert!(machine.handle(ChannelEvent::TransportMessage("{oops".into())).is_empty());
        assert_eq!(machine.state(), ConnectionState::Open);

        let effects = machine.handle(ChannelEvent::TransportMessage(r#"{"type":"dashboard_metrics"}"#.into()));
        assert!(matches!(effects.as_slice(), [Effect::Deliver(m)] if m.kind == "dashboard_metrics"));
    }

    #[test]
    fn test_disconnect_clears_active_timers_exactly_once() {
        let mut machine = open_machine();
        machine.handle(closed());
        assert!(machine.reconnect_scheduled());
        assert!(machine.is_polling());

        let effects = machine.handle(ChannelEvent::Disconnect);
        assert_eq!(count(&effects, &Effect::CancelReconnect), 1);
        assert_eq!(count(&effects, &Effect::StopPolling), 1);
        assert_eq!(count(&effects, &Effect::CloseTransport), 0);
        assert_eq!(machine.state(), ConnectionState::Stopped);

        // Terminal: nothing schedules again
        assert!(machine.handle(ChannelEvent::Disconnect).is_empty());
        assert!(machine.handle(ChannelEvent::ReconnectDue).is_empty());
        assert!(machine.handle(ChannelEvent::Connect).is_empty());
    }

    #[test]
    fn test_disconnect_while_open_only_closes_transport() {
        let mut machine = open_machine();
        let effects = machine.handle(ChannelEvent::Disconnect);
        assert_eq!(
            effects,
            vec![Effect::CloseTransport, Effect::StateChanged(ConnectionState::Stopped)]
        );
    }
}
