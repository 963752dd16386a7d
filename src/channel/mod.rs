//! Live-update channel with reconnect and polling fallback
//!
//! A channel keeps one push connection alive for dashboard and station
//! feeds. When the connection drops it polls the REST API on a fixed interval
//! and reconnects following a [`BackoffTable`]; once open again it stops
//! polling and re-announces every tracked subscription.

pub mod backoff;
pub mod machine;
pub mod manager;
pub mod messages;
pub mod transport;
pub mod websocket;

pub use backoff::{BackoffError, BackoffTable, DEFAULT_BACKOFF_MS};
pub use machine::{ChannelEvent, ChannelMachine, ConnectionState, Effect};
pub use manager::{ChannelHandle, ChannelManager, ChannelOptions, RefreshFn};
pub use messages::{ChannelCommand, LiveMessage};
pub use transport::{Transport, TransportConnection, TransportError, TransportEvent, TransportEventSender};
pub use websocket::WebSocketTransport;
