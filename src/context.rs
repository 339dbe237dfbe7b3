//! Request-scoped invocation context consumed by intercepts and redaction.

use std::collections::HashMap;

/// Request metadata carried alongside a workflow invocation.
///
/// Header lookup is case-insensitive; names are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    headers: HashMap<String, String>,
}

impl RequestMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Execution context for one wrapped-function invocation.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pub is_evaluating: bool,
    pub metadata: RequestMetadata,
}

impl InvocationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_evaluating(mut self, is_evaluating: bool) -> Self {
        self.is_evaluating = is_evaluating;
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.metadata.insert_header(name, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let ctx = InvocationContext::new().with_header("X-Tenant-Id", "acme");
        assert_eq!(ctx.metadata.header("x-tenant-id"), Some("acme"));
        assert_eq!(ctx.metadata.header("X-TENANT-ID"), Some("acme"));
        assert_eq!(ctx.metadata.header("x-other"), None);
    }
}
