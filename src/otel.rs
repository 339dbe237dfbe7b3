//! Conversion of the internal span graph into an OTLP-shaped vendor model.
//!
//! Conversion is stateless across calls: each top-level entry point allocates
//! a fresh cache keyed by span id, used only to avoid reconverting shared
//! ancestors within that one call. Parents are always converted before their
//! children so that trace identity flows downward.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::span::{Span, StatusCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtelStatusCode {
    Ok,
    Error,
    Unset,
}

/// Vendor span kind derived from the span's `event_type` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtelSpanKind {
    Llm,
    Tool,
    Chain,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct OtelEvent {
    pub name: String,
    pub timestamp: SystemTime,
    pub attributes: Map<String, Value>,
}

/// The exported vendor representation of one span.
#[derive(Debug, Clone, Serialize)]
pub struct OtelSpan {
    pub name: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub parent_span_id: Option<String>,
    pub kind: OtelSpanKind,
    pub attributes: Map<String, Value>,
    pub events: Vec<OtelEvent>,
    pub status: OtelStatusCode,
    pub status_message: Option<String>,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
}

/// Convert one span, including its parent chain, into the vendor model.
pub fn convert_span_to_otel(span: &Span) -> OtelSpan {
    let mut cache = HashMap::new();
    convert_with_parents(span, &mut cache)
}

/// Convert a batch of spans. Each span gets its own fresh conversion cache:
/// spans in the batch do not share converted-ancestor caching even when they
/// share ancestors. Call isolation is preferred over cross-call reuse.
pub fn convert_spans_to_otel_batch(spans: &[Span]) -> Vec<OtelSpan> {
    spans.iter().map(convert_span_to_otel).collect()
}

fn convert_with_parents(span: &Span, cache: &mut HashMap<String, OtelSpan>) -> OtelSpan {
    let Some(context) = &span.context else {
        // A span without tracing identity still converts; it just degrades
        // to an unparented record.
        return fallback_span(span);
    };

    if let Some(converted) = cache.get(&context.span_id) {
        return converted.clone();
    }

    let parent = span
        .parent
        .as_ref()
        .map(|parent| convert_with_parents(parent, cache));

    // Children belong to the same trace as their parent: once a parent
    // conversion has resolved a trace id, the span's own stored trace id is
    // only a fallback.
    let trace_id = parent
        .as_ref()
        .and_then(|p| p.trace_id.clone())
        .unwrap_or_else(|| context.trace_id.clone());

    let converted = OtelSpan {
        name: span.name.clone(),
        trace_id: Some(trace_id),
        span_id: Some(context.span_id.clone()),
        parent_span_id: parent.as_ref().and_then(|p| p.span_id.clone()),
        kind: span_kind_for(span.event_type()),
        attributes: span.attributes.clone(),
        events: convert_events(span),
        status: status_for(span.status.code),
        status_message: span.status.message.clone(),
        start_time: span.start_time,
        end_time: span.end_time,
    };

    cache.insert(context.span_id.clone(), converted.clone());
    converted
}

fn fallback_span(span: &Span) -> OtelSpan {
    OtelSpan {
        name: span.name.clone(),
        trace_id: None,
        span_id: None,
        parent_span_id: None,
        kind: span_kind_for(span.event_type()),
        attributes: span.attributes.clone(),
        events: convert_events(span),
        status: status_for(span.status.code),
        status_message: span.status.message.clone(),
        start_time: span.start_time,
        end_time: span.end_time,
    }
}

fn convert_events(span: &Span) -> Vec<OtelEvent> {
    span.events
        .iter()
        .map(|event| OtelEvent {
            name: event.name.clone(),
            timestamp: event.timestamp,
            attributes: event.attributes.clone(),
        })
        .collect()
}

fn status_for(code: StatusCode) -> OtelStatusCode {
    match code {
        StatusCode::Ok => OtelStatusCode::Ok,
        StatusCode::Error => OtelStatusCode::Error,
        StatusCode::Unset => OtelStatusCode::Unset,
    }
}

fn span_kind_for(event_type: Option<&str>) -> OtelSpanKind {
    match event_type {
        Some("llm_start") | Some("llm_end") | Some("llm_new_token") => OtelSpanKind::Llm,
        Some("tool_start") | Some("tool_end") => OtelSpanKind::Tool,
        Some("function_start") | Some("function_end") => OtelSpanKind::Chain,
        _ => OtelSpanKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StepKind;
    use crate::span::{SpanContext, SpanEvent, SpanStatus};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn root_span_round_trips_identity_and_status() {
        let mut span = Span::new("root").with_event_type(StepKind::FunctionStart);
        span.end(SpanStatus::ok());
        let context = span.context.clone().unwrap();

        let converted = convert_span_to_otel(&span);
        assert_eq!(converted.name, "root");
        assert_eq!(converted.trace_id.as_deref(), Some(context.trace_id.as_str()));
        assert_eq!(converted.span_id.as_deref(), Some(context.span_id.as_str()));
        assert_eq!(converted.parent_span_id, None);
        assert_eq!(converted.status, OtelStatusCode::Ok);
        assert_eq!(converted.kind, OtelSpanKind::Chain);
        assert_eq!(converted.start_time, span.start_time);
        assert_eq!(converted.end_time, span.end_time);
    }

    #[test]
    fn span_without_context_degrades_to_fallback() {
        let span = Span::new("orphan").with_context(None);
        let converted = convert_span_to_otel(&span);
        assert_eq!(converted.trace_id, None);
        assert_eq!(converted.span_id, None);
        assert_eq!(converted.parent_span_id, None);
    }

    #[test]
    fn three_level_chain_shares_root_trace_id() {
        let a = Arc::new(Span::new("a"));
        let b = Arc::new(
            // Divergent stored trace id: must be overridden by the parent's.
            Span::new("b")
                .with_context(Some(SpanContext::generate()))
                .with_parent(Arc::clone(&a)),
        );
        let c = Span::new("c")
            .with_context(Some(SpanContext::generate()))
            .with_parent(Arc::clone(&b));

        let root_trace = a.context.as_ref().unwrap().trace_id.clone();
        let converted = convert_span_to_otel(&c);
        assert_eq!(converted.trace_id.as_deref(), Some(root_trace.as_str()));
        assert_eq!(
            converted.parent_span_id.as_deref(),
            Some(b.context.as_ref().unwrap().span_id.as_str())
        );
    }

    #[test]
    fn span_kind_lookup_table() {
        for (kind, expected) in [
            (StepKind::LlmStart, OtelSpanKind::Llm),
            (StepKind::LlmNewToken, OtelSpanKind::Llm),
            (StepKind::ToolEnd, OtelSpanKind::Tool),
            (StepKind::FunctionEnd, OtelSpanKind::Chain),
            (StepKind::Custom, OtelSpanKind::Unknown),
        ] {
            let span = Span::new("k").with_event_type(kind);
            assert_eq!(convert_span_to_otel(&span).kind, expected, "{kind:?}");
        }
        let untagged = Span::new("untagged");
        assert_eq!(convert_span_to_otel(&untagged).kind, OtelSpanKind::Unknown);
    }

    #[test]
    fn events_are_copied_in_order() {
        let span = Span::new("with-events")
            .with_event(SpanEvent::new("first").with_attribute("n", json!(1)))
            .with_event(SpanEvent::new("second").with_attribute("n", json!(2)));
        let converted = convert_span_to_otel(&span);
        let names: Vec<&str> = converted.events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(converted.events[1].attributes["n"], json!(2));
    }

    #[test]
    fn batch_conversion_isolates_caches() {
        let shared = Arc::new(Span::new("shared-root"));
        let left = Span::new("left").with_parent(Arc::clone(&shared));
        let right = Span::new("right").with_parent(Arc::clone(&shared));

        let converted = convert_spans_to_otel_batch(&[left, right]);
        assert_eq!(converted.len(), 2);
        let root_trace = shared.context.as_ref().unwrap().trace_id.as_str();
        assert_eq!(converted[0].trace_id.as_deref(), Some(root_trace));
        assert_eq!(converted[1].trace_id.as_deref(), Some(root_trace));
    }

    #[test]
    fn error_status_carries_message() {
        let mut span = Span::new("failing");
        span.end(SpanStatus::error("tool exploded"));
        let converted = convert_span_to_otel(&span);
        assert_eq!(converted.status, OtelStatusCode::Error);
        assert_eq!(converted.status_message.as_deref(), Some("tool exploded"));
    }
}
