//! A final intercept that caches single-output invocations.
//!
//! Inputs are canonicalized to a sorted-key JSON string and matched either
//! exactly or by similarity ratio. Streaming invocations always bypass the
//! cache: buffering an entire stream to cache it is rejected by design.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::context::InvocationContext;
use crate::error::Result;
use crate::intercept::{
    FunctionIntercept, FunctionInterceptContext, InvokeFn, StreamFn, ValueStream,
};

/// When the cache participates in an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Cache every single-output invocation.
    Always,
    /// Cache only while the invocation context is marked as evaluating.
    Eval,
    /// Never cache; the intercept degrades to a passthrough.
    Disabled,
}

pub struct CacheIntercept {
    mode: CacheMode,
    similarity_threshold: f64,
    entries: Mutex<Vec<(String, Value)>>,
}

impl CacheIntercept {
    pub fn new(mode: CacheMode) -> Self {
        Self {
            mode,
            similarity_threshold: 1.0,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Threshold of 1.0 means exact string equality; anything lower enables
    /// fuzzy matching against the highest-ratio existing key.
    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn active_for(&self, call: &InvocationContext) -> bool {
        match self.mode {
            CacheMode::Always => true,
            CacheMode::Eval => call.is_evaluating,
            CacheMode::Disabled => false,
        }
    }

    async fn lookup(&self, key: &str) -> Option<Value> {
        let entries = self.entries.lock().await;
        if self.similarity_threshold >= 1.0 {
            return entries
                .iter()
                .find(|(k, _)| k.as_str() == key)
                .map(|(_, v)| v.clone());
        }
        entries
            .iter()
            .map(|(k, v)| (similarity_ratio(k, key), v))
            .filter(|(ratio, _)| *ratio >= self.similarity_threshold)
            .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, v)| v.clone())
    }
}

#[async_trait]
impl FunctionIntercept for CacheIntercept {
    fn is_final(&self) -> bool {
        true
    }

    async fn intercept_invoke(
        &self,
        function: &FunctionInterceptContext,
        call: InvocationContext,
        input: Value,
        next: InvokeFn,
    ) -> Result<Value> {
        if !self.active_for(&call) {
            return next(call, input).await;
        }
        let key = match canonical_key(&input) {
            Ok(key) => key,
            Err(err) => {
                // An unserializable input cannot be matched against the
                // cache; forward the call unmodified.
                debug!(
                    function = %function.function_name,
                    error = %err,
                    "cache bypass: input not serializable"
                );
                return next(call, input).await;
            }
        };
        if let Some(hit) = self.lookup(&key).await {
            debug!(function = %function.function_name, "cache hit");
            return Ok(hit);
        }
        let result = next(call, input).await?;
        self.entries.lock().await.push((key, result.clone()));
        Ok(result)
    }

    async fn intercept_stream(
        &self,
        _function: &FunctionInterceptContext,
        call: InvocationContext,
        input: Value,
        next: StreamFn,
    ) -> Result<ValueStream> {
        // Streamed chunks are never cached, regardless of mode.
        next(call, input).await
    }
}

/// Canonical cache key: JSON with object keys rebuilt in sorted order at
/// every nesting level, so logically equal inputs serialize identically.
fn canonical_key(input: &Value) -> serde_json::Result<String> {
    serde_json::to_string(&canonicalize(input))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Similarity of two strings as `2 * lcs / (|a| + |b|)` over chars.
/// Equal strings score 1.0; disjoint strings score 0.0.
fn similarity_ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() || b_chars.is_empty() {
        return 0.0;
    }
    let mut prev = vec![0usize; b_chars.len() + 1];
    let mut current = vec![0usize; b_chars.len() + 1];
    for &ca in &a_chars {
        for (j, &cb) in b_chars.iter().enumerate() {
            current[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut prev, &mut current);
    }
    let lcs = prev[b_chars.len()] as f64;
    2.0 * lcs / (a_chars.len() + b_chars.len()) as f64
}
