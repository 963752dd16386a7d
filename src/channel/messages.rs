//! Live-update wire messages

use serde::Deserialize;
use serde_json::{Map, Value, json};

/// Subscription announcement sent to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    Subscribe(String),
    Unsubscribe(String),
}

impl ChannelCommand {
    /// `{"type":"subscribe","key":"batch-1"}`
    pub fn to_text(&self) -> String {
        let (kind, key) = match self {
            Self::Subscribe(key) => ("subscribe", key),
            Self::Unsubscribe(key) => ("unsubscribe", key),
        };
        json!({ "type": kind, "key": key }).to_string()
    }
}

/// A pushed update from the server
///
/// Only `type` is required. Everything other than `type` and `key` is kept
/// verbatim in `data`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LiveMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl LiveMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}
