//! Event schema.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub ts: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_id: Option<String>,
    pub data: Value,
}

impl EventEnvelope {
    pub fn new(ts: String, event_type: impl Into<String>, data: Value) -> Self {
        Self {
            ts,
            event_type: event_type.into(),
            aggregate_id: None,
            data,
        }
    }

    pub fn with_now(event_type: impl Into<String>, data: Value) -> Self {
        Self::new(
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event_type,
            data,
        )
    }

    pub fn for_aggregate(
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            aggregate_id: Some(aggregate_id.into()),
            ..Self::with_now(event_type, data)
        }
    }
}
