// Telemetry event model
//
// Events are immutable once received; they are shared as `Arc<Event>` between
// the live buffer, archive batches and topology edges.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An event shared between the buffer, archive and topology snapshots
pub type SharedEvent = Arc<Event>;

/// Kind of observed interaction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[default]
    Request,
    Response,
    StreamMessage,
    ToolInvocation,
    TerminalIo,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Request => "request",
            EventKind::Response => "response",
            EventKind::StreamMessage => "stream_message",
            EventKind::ToolInvocation => "tool_invocation",
            EventKind::TerminalIo => "terminal_io",
        }
    }
}

/// Open metadata bag carried by every event
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Anything else the gateway attached
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One observed request/response/stream/tool/terminal interaction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub kind: EventKind,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl Event {
    /// Create a minimal event; the remaining fields default to empty
    pub fn new(id: impl Into<String>, kind: EventKind, timestamp: i64, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            timestamp,
            source: String::new(),
            destination: String::new(),
            endpoint: endpoint.into(),
            method: None,
            status: None,
            duration_ms: None,
            size_bytes: None,
            metadata: EventMetadata::default(),
        }
    }

    pub fn with_route(mut self, source: impl Into<String>, destination: impl Into<String>) -> Self {
        self.source = source.into();
        self.destination = destination.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_duration(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.metadata.category = Some(category.into());
        self
    }

    /// Status codes 400 and above count as errors
    pub fn is_error(&self) -> bool {
        self.status.is_some_and(|status| status >= 400)
    }

    /// Category used for hierarchical grouping and category filtering.
    /// Falls back to the event kind when the gateway sent none.
    pub fn category(&self) -> &str {
        match self.metadata.category.as_deref() {
            Some(category) if !category.is_empty() => category,
            _ => self.kind.as_str(),
        }
    }

    /// The routable path, stripped of its query string
    pub fn path(&self) -> &str {
        let raw = if self.endpoint.is_empty() {
            self.destination.as_str()
        } else {
            self.endpoint.as_str()
        };
        let path = raw.split('?').next().unwrap_or(raw);
        if path.is_empty() {
            "unknown"
        } else {
            path
        }
    }
}
