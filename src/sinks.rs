//! Bundled export sinks: the generic span publisher and a JSONL file backend.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::context::InvocationContext;
use crate::error::Result;
use crate::event::IntermediateStep;
use crate::exporter::ExportSink;
use crate::otel::{convert_span_to_otel, OtelSpan};
use crate::redaction::SpanRedactionProcessor;
use crate::span::{Span, SpanStatus};

/// The generic span-publishing sink behind the registry's default entry.
///
/// Builds a [`Span`] from each matching start/end step pair, applies the
/// optional redaction processor, converts to the vendor model, and publishes
/// it to the log. Published spans are retained for inspection.
pub struct SpanPublishSink {
    name: String,
    redaction: Option<Arc<dyn SpanRedactionProcessor>>,
    request: InvocationContext,
    open: Mutex<HashMap<String, Span>>,
    closed: Mutex<HashMap<String, Span>>,
    published: Mutex<Vec<OtelSpan>>,
}

impl SpanPublishSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            redaction: None,
            request: InvocationContext::new(),
            open: Mutex::new(HashMap::new()),
            closed: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn with_redaction(mut self, processor: Arc<dyn SpanRedactionProcessor>) -> Self {
        self.redaction = Some(processor);
        self
    }

    /// Request-scoped context consulted for redaction decisions.
    pub fn with_request_context(mut self, request: InvocationContext) -> Self {
        self.request = request;
        self
    }

    pub fn published(&self) -> Vec<OtelSpan> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExportSink for SpanPublishSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_start(&self, step: &IntermediateStep) {
        let mut span = Span::new(step.name.clone())
            .with_event_type(step.kind)
            .with_start_time(step.emitted_at);
        for (key, value) in &step.payload {
            span.set_attribute(key.clone(), value.clone());
        }
        self.open.lock().unwrap().insert(step.span_id.clone(), span);
    }

    fn process_end(&self, step: &IntermediateStep) {
        let Some(mut span) = self.open.lock().unwrap().remove(&step.span_id) else {
            return;
        };
        for (key, value) in &step.payload {
            span.set_attribute(key.clone(), value.clone());
        }
        let status = match step.payload.get("error") {
            // String payloads become the message as-is; `Value::to_string`
            // would bake JSON quoting into it.
            Some(err) => SpanStatus::error(
                err.as_str()
                    .map(str::to_owned)
                    .unwrap_or_else(|| err.to_string()),
            ),
            None => SpanStatus::ok(),
        };
        span.end_at(step.emitted_at, status);
        self.closed
            .lock()
            .unwrap()
            .insert(step.span_id.clone(), span);
    }

    async fn export(&self, step: Arc<IntermediateStep>) -> Result<()> {
        if !step.kind.is_end() {
            return Ok(());
        }
        let Some(mut span) = self.closed.lock().unwrap().remove(&step.span_id) else {
            // End without a matching start: nothing to publish.
            return Ok(());
        };
        if let Some(processor) = &self.redaction {
            processor.process(&mut span, &self.request);
        }
        let converted = convert_span_to_otel(&span);
        debug!(
            sink = %self.name,
            span = %converted.name,
            "publishing span"
        );
        self.published.lock().unwrap().push(converted);
        Ok(())
    }
}

/// Appends one JSON object per exported step to a local file.
pub struct JsonlFileSink {
    name: String,
    path: PathBuf,
    file: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl JsonlFileSink {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            file: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl ExportSink for JsonlFileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pre_start(&self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        *self.file.lock().await = Some(file);
        Ok(())
    }

    async fn export(&self, step: Arc<IntermediateStep>) -> Result<()> {
        let mut line = serde_json::to_vec(step.as_ref())?;
        line.push(b'\n');
        let mut guard = self.file.lock().await;
        let Some(file) = guard.as_mut() else {
            return Err(crate::error::TracewayError::Export(format!(
                "sink `{}` has no open file",
                self.name
            )));
        };
        file.write_all(&line).await?;
        Ok(())
    }

    async fn cleanup(&self) {
        let mut guard = self.file.lock().await;
        if let Some(mut file) = guard.take() {
            let _ = file.flush().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StepKind;
    use crate::otel::OtelStatusCode;
    use crate::redaction::{HeaderRedactionProcessor, DEFAULT_REDACTION_SENTINEL};
    use serde_json::json;

    fn start_end_pair(name: &str) -> (IntermediateStep, IntermediateStep) {
        let start = IntermediateStep::new(StepKind::ToolStart, name)
            .with_payload("input", json!("the query"));
        let end = IntermediateStep::new(StepKind::ToolEnd, name)
            .with_span_id(start.span_id.clone())
            .with_payload("output", json!("the answer"));
        (start, end)
    }

    #[tokio::test]
    async fn publishes_span_for_matched_pair() {
        let sink = SpanPublishSink::new("publisher");
        let (start, end) = start_end_pair("tool.lookup");

        sink.process_start(&start);
        sink.process_end(&end);
        sink.export(Arc::new(end)).await.unwrap();

        let published = sink.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].name, "tool.lookup");
        assert_eq!(published[0].status, OtelStatusCode::Ok);
        assert_eq!(published[0].attributes["input"], json!("the query"));
        assert_eq!(published[0].attributes["output"], json!("the answer"));
    }

    #[tokio::test]
    async fn end_without_start_publishes_nothing() {
        let sink = SpanPublishSink::new("publisher");
        let end = IntermediateStep::new(StepKind::ToolEnd, "orphan");
        sink.process_end(&end);
        sink.export(Arc::new(end)).await.unwrap();
        assert!(sink.published().is_empty());
    }

    #[tokio::test]
    async fn error_payload_marks_span_failed() {
        let sink = SpanPublishSink::new("publisher");
        let start = IntermediateStep::new(StepKind::FunctionStart, "f");
        let end = IntermediateStep::new(StepKind::FunctionEnd, "f")
            .with_span_id(start.span_id.clone())
            .with_payload("error", json!("boom"));

        sink.process_start(&start);
        sink.process_end(&end);
        sink.export(Arc::new(end)).await.unwrap();

        let published = sink.published();
        assert_eq!(published[0].status, OtelStatusCode::Error);
        // The message is the payload string itself, without JSON quoting.
        assert_eq!(published[0].status_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn applies_redaction_before_publishing() {
        let processor = Arc::new(
            HeaderRedactionProcessor::new(
                vec!["x-tenant-id".into()],
                vec!["input".into()],
                Arc::new(|_pairs| true),
            ),
        );
        let sink = SpanPublishSink::new("publisher")
            .with_redaction(processor)
            .with_request_context(InvocationContext::new().with_header("x-tenant-id", "t-1"));
        let (start, end) = start_end_pair("tool.lookup");

        sink.process_start(&start);
        sink.process_end(&end);
        sink.export(Arc::new(end)).await.unwrap();

        let published = sink.published();
        assert_eq!(
            published[0].attributes["input"],
            json!(DEFAULT_REDACTION_SENTINEL)
        );
        assert_eq!(published[0].attributes["output"], json!("the answer"));
    }

    #[tokio::test]
    async fn jsonl_sink_appends_one_line_per_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.jsonl");
        let sink = JsonlFileSink::new("jsonl", &path);

        sink.pre_start().await.unwrap();
        sink.export(Arc::new(IntermediateStep::new(StepKind::Custom, "one")))
            .await
            .unwrap();
        sink.export(Arc::new(IntermediateStep::new(StepKind::Custom, "two")))
            .await
            .unwrap();
        sink.cleanup().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["name"], json!("one"));
    }

    #[tokio::test]
    async fn jsonl_sink_without_open_file_reports_export_error() {
        let sink = JsonlFileSink::new("jsonl", "/tmp/never-opened.jsonl");
        let err = sink
            .export(Arc::new(IntermediateStep::new(StepKind::Custom, "x")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no open file"));
    }
}
