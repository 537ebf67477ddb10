//! Types for the realtime gateway boundary.
//!
//! Everything the sync stack consumes from the backend transport is expressed
//! here: change events, channel status acknowledgments, and the device-level
//! network/app-state notifications surfaced by the platform monitor.

use serde::{Deserialize, Serialize};

/// Kind of row change delivered on a channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEventType {
    Insert,
    Update,
    Delete,
}

impl ChangeEventType {
    /// Wire spelling used in subscription scopes and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEventType::Insert => "INSERT",
            ChangeEventType::Update => "UPDATE",
            ChangeEventType::Delete => "DELETE",
        }
    }
}

/// Which change kinds a subscription wants to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventScope {
    /// All of INSERT/UPDATE/DELETE.
    #[default]
    All,
    /// A single change kind.
    Only(ChangeEventType),
}

impl EventScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventScope::All => "*",
            EventScope::Only(event) => event.as_str(),
        }
    }
}

/// A single row change as delivered by the gateway.
///
/// `new` carries the row after INSERT/UPDATE, `old` the row before
/// UPDATE/DELETE. Rows arrive as raw JSON and are decoded into typed rows by
/// the data listeners layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "eventType")]
    pub event_type: ChangeEventType,
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub new: Option<serde_json::Value>,
    #[serde(default)]
    pub old: Option<serde_json::Value>,
}

fn default_schema() -> String {
    "public".to_string()
}

/// Scope of a channel subscription: which rows of which table, and which
/// change kinds, the channel should deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeScope {
    pub schema: String,
    pub table: String,
    pub event: EventScope,
    /// Row predicate in `column=op.value` form, e.g. `owner_id=eq.user-42`.
    pub filter: Option<String>,
}

impl ChangeScope {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            schema: "public".to_string(),
            table: table.into(),
            event: EventScope::All,
            filter: None,
        }
    }
}

/// Channel-level acknowledgments from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// The backend acknowledged the subscription; changes will flow.
    Subscribed,
    /// The channel failed; the subscription must be re-created.
    ChannelError { reason: String },
    /// The channel was closed by the backend.
    Closed,
}

/// Everything a channel's message stream can yield.
#[derive(Debug, Clone)]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Change(ChangeEvent),
}

/// Device network reachability as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStatus {
    pub connected: bool,
    /// e.g. `wifi`, `cellular`, `none`, `unknown`.
    pub connection_type: String,
}

/// App foreground/background transition as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppStateChange {
    pub is_active: bool,
}

/// Error types for gateway and platform operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Handshake error: {0}")]
    Handshake(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Platform error: {0}")]
    Platform(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_event_decodes_wire_payload() {
        let raw = serde_json::json!({
            "eventType": "UPDATE",
            "table": "properties",
            "new": { "id": "p-1", "status": "rented" },
            "old": { "id": "p-1", "status": "available" }
        });

        let event: ChangeEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.event_type, ChangeEventType::Update);
        assert_eq!(event.schema, "public");
        assert_eq!(event.table, "properties");
        assert!(event.new.is_some());
        assert!(event.old.is_some());
    }

    #[test]
    fn event_scope_spelling() {
        assert_eq!(EventScope::All.as_str(), "*");
        assert_eq!(EventScope::Only(ChangeEventType::Delete).as_str(), "DELETE");
    }
}
