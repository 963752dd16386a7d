//! Offline operation queue
//!
//! Operator actions that fail to reach the backend are persisted here and
//! replayed, oldest first, once connectivity returns.

pub mod id;
pub mod models;
pub mod operation_queue;
pub mod processor;

pub use id::{Clock, IdGenerator, SystemClock, TimeRandomIdGenerator};
pub use models::{
    CompletePayload, DEFAULT_MAX_RETRIES, OperationType, ProcessResult, QueueItem, QueuedAction,
    StartPayload,
};
pub use operation_queue::{OperationQueue, QUEUE_KEY_PREFIX};
pub use processor::{ActionSubmitter, DrainSummary, ProgressFn, QueueProcessor};
