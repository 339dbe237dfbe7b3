//! The normalized telemetry record produced from intermediate steps.

use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::event::StepKind;

/// Reserved attribute key classifying a span for vendor-kind mapping.
pub const EVENT_TYPE_KEY: &str = "event_type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    Error,
    Unset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanStatus {
    pub code: StatusCode,
    pub message: Option<String>,
}

impl SpanStatus {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            message: None,
        }
    }

    pub fn unset() -> Self {
        Self {
            code: StatusCode::Unset,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Error,
            message: Some(message.into()),
        }
    }
}

impl Default for SpanStatus {
    fn default() -> Self {
        Self::unset()
    }
}

/// Tracing identity of a span. Absence means "unparented/fallback" span.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
}

impl SpanContext {
    pub fn generate() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            span_id: Uuid::new_v4().to_string(),
        }
    }

    /// Identity within an existing trace.
    pub fn child_of(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: Uuid::new_v4().to_string(),
        }
    }
}

/// A named sub-event attached to a span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: SystemTime,
    pub attributes: Map<String, Value>,
}

impl SpanEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp: SystemTime::now(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// One traced operation.
///
/// The parent link is a back-reference fixed at creation time; parent chains
/// are acyclic by construction. The parent is not serialized — only the
/// identity link survives conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub name: String,
    pub context: Option<SpanContext>,
    #[serde(skip)]
    pub parent: Option<Arc<Span>>,
    pub attributes: Map<String, Value>,
    pub events: Vec<SpanEvent>,
    pub status: SpanStatus,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
}

impl Span {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: Some(SpanContext::generate()),
            parent: None,
            attributes: Map::new(),
            events: Vec::new(),
            status: SpanStatus::unset(),
            start_time: SystemTime::now(),
            end_time: None,
        }
    }

    pub fn with_context(mut self, context: Option<SpanContext>) -> Self {
        self.context = context;
        self
    }

    pub fn with_parent(mut self, parent: Arc<Span>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_event_type(mut self, kind: StepKind) -> Self {
        self.attributes
            .insert(EVENT_TYPE_KEY.into(), Value::String(kind.as_str().into()));
        self
    }

    pub fn with_event(mut self, event: SpanEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_start_time(mut self, at: SystemTime) -> Self {
        self.start_time = at;
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    pub fn add_event(&mut self, event: SpanEvent) {
        self.events.push(event);
    }

    /// Close the span with the given status.
    pub fn end(&mut self, status: SpanStatus) {
        self.end_time = Some(SystemTime::now());
        self.status = status;
    }

    pub fn end_at(&mut self, at: SystemTime, status: SpanStatus) {
        self.end_time = Some(at);
        self.status = status;
    }

    /// The `event_type` attribute value, if one was recorded.
    pub fn event_type(&self) -> Option<&str> {
        self.attributes.get(EVENT_TYPE_KEY).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_span_with_attributes_and_events() {
        let span = Span::new("tool.search")
            .with_event_type(StepKind::ToolStart)
            .with_attribute("input", json!({"q": "rust"}))
            .with_event(SpanEvent::new("retry").with_attribute("attempt", json!(1)));

        assert_eq!(span.event_type(), Some("tool_start"));
        assert_eq!(span.events.len(), 1);
        assert!(span.context.is_some());
        assert!(span.end_time.is_none());
    }

    #[test]
    fn parent_chain_is_fixed_at_creation() {
        let root = Arc::new(Span::new("root"));
        let child = Span::new("child").with_parent(Arc::clone(&root));
        assert_eq!(child.parent.as_ref().unwrap().name, "root");
    }

    #[test]
    fn end_records_status_and_timestamp() {
        let mut span = Span::new("op");
        span.end(SpanStatus::error("boom"));
        assert_eq!(span.status.code, StatusCode::Error);
        assert_eq!(span.status.message.as_deref(), Some("boom"));
        assert!(span.end_time.is_some());
    }

    #[test]
    fn child_context_shares_trace_id() {
        let parent = SpanContext::generate();
        let child = SpanContext::child_of(parent.trace_id.clone());
        assert_eq!(child.trace_id, parent.trace_id);
        assert_ne!(child.span_id, parent.span_id);
    }
}
