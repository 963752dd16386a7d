//! Data models for the offline operation queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Default retry ceiling for a queued action
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Which backend action a queue item represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Start,
    Complete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request data for starting a process step on a WIP item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub wip_id: String,
    pub process_id: String,
    pub worker_id: String,
}

/// Outcome of a process step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessResult {
    Pass,
    Fail,
}

impl std::str::FromStr for ProcessResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            other => Err(format!("unknown process result '{}', expected pass or fail", other)),
        }
    }
}

/// Request data for completing a process step on a WIP item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    pub wip_id: String,
    pub process_id: String,
    pub worker_id: String,
    pub result: ProcessResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// An operator action waiting to reach the backend
///
/// Serialized adjacently tagged so stored items read as
/// `{"type": "start", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum QueuedAction {
    Start(StartPayload),
    Complete(CompletePayload),
}

impl QueuedAction {
    pub fn operation_type(&self) -> OperationType {
        match self {
            Self::Start(_) => OperationType::Start,
            Self::Complete(_) => OperationType::Complete,
        }
    }

    pub fn wip_id(&self) -> &str {
        match self {
            Self::Start(p) => &p.wip_id,
            Self::Complete(p) => &p.wip_id,
        }
    }
}

/// A single pending operator action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    #[serde(flatten)]
    pub action: QueuedAction,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl QueueItem {
    pub fn operation_type(&self) -> OperationType {
        self.action.operation_type()
    }

    /// Whether one more failure would exhaust this item
    pub fn is_last_attempt(&self) -> bool {
        self.retry_count + 1 >= self.max_retries
    }
}
