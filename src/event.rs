//! Intermediate step events and the in-process event stream.
//!
//! A running workflow publishes [`IntermediateStep`]s onto an [`EventStream`];
//! exporters subscribe and receive each step through a synchronous callback.
//! The publisher invokes callbacks serially and never blocks on them, so
//! subscribers must hand real work off to the async runtime themselves.

use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// What a single step of workflow execution represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    LlmStart,
    LlmEnd,
    LlmNewToken,
    ToolStart,
    ToolEnd,
    FunctionStart,
    FunctionEnd,
    Custom,
}

impl StepKind {
    pub fn is_start(&self) -> bool {
        matches!(
            self,
            StepKind::LlmStart | StepKind::ToolStart | StepKind::FunctionStart
        )
    }

    pub fn is_end(&self) -> bool {
        matches!(
            self,
            StepKind::LlmEnd | StepKind::ToolEnd | StepKind::FunctionEnd
        )
    }

    /// The wire name used in span attributes and serialized payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::LlmStart => "llm_start",
            StepKind::LlmEnd => "llm_end",
            StepKind::LlmNewToken => "llm_new_token",
            StepKind::ToolStart => "tool_start",
            StepKind::ToolEnd => "tool_end",
            StepKind::FunctionStart => "function_start",
            StepKind::FunctionEnd => "function_end",
            StepKind::Custom => "custom",
        }
    }
}

/// One unit of workflow execution, emitted onto the event stream.
///
/// Steps are created by the executing workflow, consumed by zero or more
/// exporter subscriptions, and never mutated after emission. Matching
/// start/end pairs share a `span_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntermediateStep {
    pub kind: StepKind,
    pub name: String,
    pub span_id: String,
    pub payload: Map<String, Value>,
    pub emitted_at: SystemTime,
}

impl IntermediateStep {
    pub fn new(kind: StepKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            span_id: Uuid::new_v4().to_string(),
            payload: Map::new(),
            emitted_at: SystemTime::now(),
        }
    }

    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = span_id.into();
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}

type NextFn = Arc<dyn Fn(Arc<IntermediateStep>) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&str) + Send + Sync>;
type CompleteFn = Arc<dyn Fn() + Send + Sync>;

struct Subscriber {
    id: Uuid,
    on_next: NextFn,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
}

#[derive(Default)]
struct StreamInner {
    subscribers: Vec<Subscriber>,
    completed: bool,
}

/// Multi-subscriber publish channel for [`IntermediateStep`]s.
///
/// Cloning is cheap; all clones share the same subscriber list. Emission is
/// serial: each subscriber's `on_next` runs synchronously on the publishing
/// call, in subscription order.
#[derive(Clone, Default)]
pub struct EventStream {
    inner: Arc<Mutex<StreamInner>>,
}

impl EventStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe with an `on_next` callback only.
    pub fn subscribe<F>(&self, on_next: F) -> Subscription
    where
        F: Fn(Arc<IntermediateStep>) + Send + Sync + 'static,
    {
        self.subscribe_full(on_next, None, None)
    }

    /// Subscribe with optional error and completion callbacks.
    pub fn subscribe_full<F>(
        &self,
        on_next: F,
        on_error: Option<ErrorFn>,
        on_complete: Option<CompleteFn>,
    ) -> Subscription
    where
        F: Fn(Arc<IntermediateStep>) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.push(Subscriber {
            id,
            on_next: Arc::new(on_next),
            on_error,
            on_complete,
        });
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Publish one step to every current subscriber, in subscription order.
    ///
    /// Emitting on a completed stream is a no-op.
    pub fn emit(&self, step: IntermediateStep) {
        let step = Arc::new(step);
        let callbacks: Vec<NextFn> = {
            let inner = self.inner.lock().unwrap();
            if inner.completed {
                return;
            }
            inner.subscribers.iter().map(|s| Arc::clone(&s.on_next)).collect()
        };
        for on_next in callbacks {
            on_next(Arc::clone(&step));
        }
    }

    /// Notify every subscriber of a publisher-side error.
    pub fn emit_error(&self, message: &str) {
        let callbacks: Vec<ErrorFn> = {
            let inner = self.inner.lock().unwrap();
            inner
                .subscribers
                .iter()
                .filter_map(|s| s.on_error.as_ref().map(Arc::clone))
                .collect()
        };
        for on_error in callbacks {
            on_error(message);
        }
    }

    /// Mark the stream complete. Subsequent emits are dropped.
    pub fn complete(&self) {
        let callbacks: Vec<CompleteFn> = {
            let mut inner = self.inner.lock().unwrap();
            if inner.completed {
                return;
            }
            inner.completed = true;
            inner
                .subscribers
                .iter()
                .filter_map(|s| s.on_complete.as_ref().map(Arc::clone))
                .collect()
        };
        for on_complete in callbacks {
            on_complete();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }
}

/// Handle for one subscription. Dropping the handle does NOT unsubscribe;
/// call [`Subscription::unsubscribe`], which is idempotent.
pub struct Subscription {
    id: Uuid,
    inner: Weak<Mutex<StreamInner>>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock().unwrap();
            inner.subscribers.retain(|s| s.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_steps_in_order_to_all_subscribers() {
        let stream = EventStream::new();
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));

        let a = seen_a.clone();
        let _sub_a = stream.subscribe(move |step| a.lock().unwrap().push(step.name.clone()));
        let b = seen_b.clone();
        let _sub_b = stream.subscribe(move |step| b.lock().unwrap().push(step.name.clone()));

        stream.emit(IntermediateStep::new(StepKind::ToolStart, "first"));
        stream.emit(IntermediateStep::new(StepKind::ToolEnd, "second"));

        assert_eq!(*seen_a.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(*seen_b.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let stream = EventStream::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = stream.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        stream.emit(IntermediateStep::new(StepKind::Custom, "one"));
        sub.unsubscribe();
        sub.unsubscribe();
        stream.emit(IntermediateStep::new(StepKind::Custom, "two"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn completed_stream_drops_emissions() {
        let stream = EventStream::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        let _sub = stream.subscribe_full(
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            None,
            Some(Arc::new(move || {
                d.fetch_add(1, Ordering::SeqCst);
            })),
        );

        stream.emit(IntermediateStep::new(StepKind::Custom, "kept"));
        stream.complete();
        stream.complete();
        stream.emit(IntermediateStep::new(StepKind::Custom, "dropped"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn publisher_errors_reach_error_callbacks_only() {
        let stream = EventStream::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        let _sub = stream.subscribe_full(
            |_| {},
            Some(Arc::new(move |msg: &str| {
                e.lock().unwrap().push(msg.to_string());
            })),
            None,
        );

        stream.emit_error("upstream closed");
        assert_eq!(*errors.lock().unwrap(), vec!["upstream closed"]);
    }

    #[test]
    fn start_and_end_kinds_are_disjoint() {
        for kind in [
            StepKind::LlmStart,
            StepKind::LlmEnd,
            StepKind::LlmNewToken,
            StepKind::ToolStart,
            StepKind::ToolEnd,
            StepKind::FunctionStart,
            StepKind::FunctionEnd,
            StepKind::Custom,
        ] {
            assert!(!(kind.is_start() && kind.is_end()), "{kind:?}");
        }
    }
}
