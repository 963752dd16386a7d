//! Offline operation queue and live-update sync for shop-floor terminals
//!
//! Operator actions (process start / complete) are submitted directly while
//! the backend is reachable and persisted in a durable queue otherwise. The
//! queue is replayed in creation order on reconnect with a bounded retry
//! budget per action. Dashboard and station feeds arrive over a live channel
//! that falls back to REST polling and reconnects on a fixed backoff table.

pub mod api;
pub mod channel;
pub mod cli;
pub mod config;
pub mod connectivity;
pub mod queue;
pub mod storage;
pub mod sync;

pub use sync::{OfflineSync, SubmitOutcome};
