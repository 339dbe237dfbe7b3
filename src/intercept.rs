//! Composable wrappers around a function's invocation paths.
//!
//! A chain is built once per function instance from a validated sequence of
//! intercepts and reused across invocations. Composition is reverse-order:
//! the first declared intercept is the outermost wrapper, so it sees the raw
//! input first and the raw output last. A "final" intercept, if declared,
//! must be last; it sits innermost and decides whether the underlying
//! function runs at all.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::context::InvocationContext;
use crate::error::{Result, TracewayError};

/// Immutable description of the function being wrapped. Created once when
/// the function instance is built and shared read-only by every intercept.
#[derive(Debug, Clone)]
pub struct FunctionInterceptContext {
    pub function_name: String,
    pub description: Option<String>,
    pub config: Value,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
}

impl FunctionInterceptContext {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            description: None,
            config: Value::Null,
            input_schema: None,
            output_schema: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// Stream of output chunks from a streaming invocation.
pub type ValueStream = BoxStream<'static, Result<Value>>;

/// The composed single-output invocation path.
pub type InvokeFn =
    Arc<dyn Fn(InvocationContext, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// The composed streaming invocation path.
pub type StreamFn =
    Arc<dyn Fn(InvocationContext, Value) -> BoxFuture<'static, Result<ValueStream>> + Send + Sync>;

/// A composable wrapper around a function invocation.
///
/// The defaults delegate straight to `next`: a no-op passthrough intercept is
/// valid and does nothing but forward.
#[async_trait]
pub trait FunctionIntercept: Send + Sync {
    /// Structural position marker: a final intercept must be the last element
    /// of the chain. Whether it actually short-circuits at run time is its
    /// own decision inside `intercept_invoke`.
    fn is_final(&self) -> bool {
        false
    }

    async fn intercept_invoke(
        &self,
        _function: &FunctionInterceptContext,
        call: InvocationContext,
        input: Value,
        next: InvokeFn,
    ) -> Result<Value> {
        next(call, input).await
    }

    async fn intercept_stream(
        &self,
        _function: &FunctionInterceptContext,
        call: InvocationContext,
        input: Value,
        next: StreamFn,
    ) -> Result<ValueStream> {
        next(call, input).await
    }
}

/// Validate a declared intercept sequence.
///
/// At most one intercept may be final, and a final intercept must be the last
/// element. These are configuration errors caught at build time, never at
/// call time. An empty sequence is valid: the chain is a plain passthrough.
pub fn validate_intercepts(intercepts: &[Arc<dyn FunctionIntercept>]) -> Result<()> {
    let finals = intercepts.iter().filter(|i| i.is_final()).count();
    if finals > 1 {
        return Err(TracewayError::InterceptChain(format!(
            "at most one final intercept is allowed, found {finals}"
        )));
    }
    if finals == 1 && !intercepts.last().map(|i| i.is_final()).unwrap_or(false) {
        return Err(TracewayError::InterceptChain(
            "a final intercept must be the last element of the chain".into(),
        ));
    }
    Ok(())
}

/// An ordered, validated chain of intercepts for one function instance.
pub struct FunctionInterceptChain {
    function: Arc<FunctionInterceptContext>,
    intercepts: Vec<Arc<dyn FunctionIntercept>>,
}

impl FunctionInterceptChain {
    pub fn new(
        function: FunctionInterceptContext,
        intercepts: Vec<Arc<dyn FunctionIntercept>>,
    ) -> Result<Self> {
        validate_intercepts(&intercepts)?;
        Ok(Self {
            function: Arc::new(function),
            intercepts,
        })
    }

    pub fn len(&self) -> usize {
        self.intercepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intercepts.is_empty()
    }

    /// Compose the single-output path around `final_call`.
    pub fn build_single(&self, final_call: InvokeFn) -> InvokeFn {
        let mut next = final_call;
        for intercept in self.intercepts.iter().rev() {
            let intercept = Arc::clone(intercept);
            let function = Arc::clone(&self.function);
            let inner = next;
            next = Arc::new(move |call: InvocationContext, input: Value| {
                let intercept = Arc::clone(&intercept);
                let function = Arc::clone(&function);
                let inner = Arc::clone(&inner);
                Box::pin(async move {
                    intercept
                        .intercept_invoke(&function, call, input, inner)
                        .await
                })
            });
        }
        next
    }

    /// Compose the streaming path around `final_call`.
    pub fn build_stream(&self, final_call: StreamFn) -> StreamFn {
        let mut next = final_call;
        for intercept in self.intercepts.iter().rev() {
            let intercept = Arc::clone(intercept);
            let function = Arc::clone(&self.function);
            let inner = next;
            next = Arc::new(move |call: InvocationContext, input: Value| {
                let intercept = Arc::clone(&intercept);
                let function = Arc::clone(&function);
                let inner = Arc::clone(&inner);
                Box::pin(async move {
                    intercept
                        .intercept_stream(&function, call, input, inner)
                        .await
                })
            });
        }
        next
    }
}
