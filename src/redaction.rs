//! Header-driven span redaction.
//!
//! Redaction decisions are derived from request headers, not from span
//! content: a user-supplied callback inspects the ordered header pairs and
//! answers once per distinct combination. Decisions are memoized in a bounded
//! LRU cache because header combinations repeat heavily across a burst of
//! spans from the same client or session.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde_json::Value;

use crate::config::RedactionConfig;
use crate::context::InvocationContext;
use crate::span::Span;

pub const DEFAULT_REDACTION_SENTINEL: &str = "[REDACTED]";
const DECISION_CACHE_CAPACITY: usize = 128;

/// Decides per-span whether to scrub attributes, and does the scrubbing.
pub trait SpanRedactionProcessor: Send + Sync {
    fn should_redact(&self, span: &Span, ctx: &InvocationContext) -> bool;

    fn redact_item(&self, span: &mut Span);

    fn process(&self, span: &mut Span, ctx: &InvocationContext) {
        if self.should_redact(span, ctx) {
            self.redact_item(span);
        }
    }
}

/// Callback receiving the ordered `(header_name, header_value)` pairs that
/// were present on the request. Returns whether to redact.
pub type RedactionCallback = Arc<dyn Fn(&[(String, String)]) -> bool + Send + Sync>;

pub struct HeaderRedactionProcessor {
    enabled: bool,
    force_redact: bool,
    headers: Vec<String>,
    attributes: Vec<String>,
    sentinel: Value,
    callback: RedactionCallback,
    decisions: Mutex<LruCache<Vec<(String, String)>, bool>>,
}

impl HeaderRedactionProcessor {
    pub fn new(headers: Vec<String>, attributes: Vec<String>, callback: RedactionCallback) -> Self {
        Self {
            enabled: true,
            force_redact: false,
            headers,
            attributes,
            sentinel: Value::String(DEFAULT_REDACTION_SENTINEL.into()),
            callback,
            decisions: Mutex::new(LruCache::new(
                NonZeroUsize::new(DECISION_CACHE_CAPACITY).expect("cache capacity must be > 0"),
            )),
        }
    }

    /// Build from loaded settings. The decision callback cannot live in a
    /// config file, so it is still supplied by the caller.
    pub fn from_config(cfg: &RedactionConfig, callback: RedactionCallback) -> Self {
        Self::new(cfg.headers.clone(), cfg.attributes.clone(), callback)
            .with_enabled(cfg.enabled)
            .with_force_redact(cfg.force_redact)
            .with_sentinel(cfg.sentinel.clone())
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Escape hatch: redact every span regardless of headers.
    pub fn with_force_redact(mut self, force: bool) -> Self {
        self.force_redact = force;
        self
    }

    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.sentinel = Value::String(sentinel.into());
        self
    }

    /// The ordered header pairs present on this request, keyed by the
    /// configured header names. Absent headers contribute nothing.
    fn present_headers(&self, ctx: &InvocationContext) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter_map(|name| {
                ctx.metadata
                    .header(name)
                    .map(|value| (name.clone(), value.to_string()))
            })
            .collect()
    }
}

impl SpanRedactionProcessor for HeaderRedactionProcessor {
    fn should_redact(&self, _span: &Span, ctx: &InvocationContext) -> bool {
        if self.force_redact {
            return true;
        }
        if !self.enabled {
            return false;
        }
        let pairs = self.present_headers(ctx);
        if pairs.is_empty() {
            // No signal to decide on: fail open, not closed.
            return false;
        }
        let mut decisions = self.decisions.lock().unwrap();
        if let Some(decision) = decisions.get(&pairs) {
            return *decision;
        }
        let decision = (self.callback)(&pairs);
        decisions.put(pairs, decision);
        decision
    }

    fn redact_item(&self, span: &mut Span) {
        for key in &self.attributes {
            if let Some(slot) = span.attributes.get_mut(key) {
                *slot = self.sentinel.clone();
            }
        }
    }
}
