//! Canonical event envelope and the event-type catalog (§3, §4.2).

use super::CorrelationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Self-describing event envelope: `{specversion, type, source, id, time, data, correlationId?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "specversion")]
    pub spec_version: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub correlation_id: Option<CorrelationId>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        correlation_id: Option<CorrelationId>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            spec_version: "1.0".to_string(),
            event_type: event_type.into(),
            source: source.into(),
            id: Uuid::new_v4(),
            time: Utc::now(),
            correlation_id,
            data,
        }
    }
}

/// Dotted event type names from the canonical catalog (§3).
pub mod event_type {
    pub const AGENT_STARTED: &str = "agent.started";
    pub const AGENT_COMPLETED: &str = "agent.completed";
    pub const AGENT_FAILED: &str = "agent.failed";
    pub const PROVIDER_FALLBACK: &str = "provider.fallback";
    pub const PROVIDER_SUCCESS: &str = "provider.success";
    pub const TOOL_MAPPING_STARTED: &str = "tool.mapping.started";
    pub const TOOL_MAPPING_COMPLETED: &str = "tool.mapping.completed";
    pub const TOOL_MAPPING_ERROR: &str = "tool.mapping.error";
    pub const CIRCUIT_STATE_CHANGED: &str = "circuit.state.changed";
    pub const CIRCUIT_TIMEOUT: &str = "circuit.timeout";
    pub const BUS_HANDLER_FAILED: &str = "bus.handler.failed";
    pub const TASK_ASSIGNED: &str = "task.assigned";
    pub const SESSION_CREATED: &str = "session.created";
}
