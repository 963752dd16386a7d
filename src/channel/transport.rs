//! Transport abstraction for the live-update channel
//!
//! A transport behaves like a browser socket: `open` returns a connection
//! handle immediately and reports progress asynchronously as
//! [`TransportEvent`]s. Failing inside `open` itself means the connection
//! could not even be attempted (bad endpoint and the like).

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Error(String),
    Closed(Option<String>),
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("connection is not open")]
    NotReady,

    #[error("failed to send: {0}")]
    Send(String),
}

/// Factory for new connections
pub trait Transport: Send + Sync {
    fn open(&self, events: TransportEventSender) -> Result<Box<dyn TransportConnection>, TransportError>;
}

/// One connection attempt
pub trait TransportConnection: Send {
    /// Whether the connection is open and `send` can succeed
    fn is_ready(&self) -> bool;

    fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Close the connection. Safe to call more than once.
    fn close(&mut self);
}
