//! Catalog of named exporter factories.
//!
//! The registry stores factories, not instances: every lookup invokes the
//! factory and hands back a fresh [`Exporter`], so no exporter state is ever
//! shared between concurrent workflow runs. The registry itself is an
//! explicitly constructed value owned by the composition root; clone the
//! `Arc` to share it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use crate::error::{Result, TracewayError};
use crate::exporter::Exporter;
use crate::sinks::SpanPublishSink;

/// Name of the built-in default entry, a generic span-publishing exporter.
pub const DEFAULT_EXPORTER_NAME: &str = "span_publisher";

/// Zero-argument async factory producing a fresh exporter instance.
/// Factories must not share mutable instance state across invocations.
pub type ExporterFactory = Arc<dyn Fn() -> BoxFuture<'static, Arc<Exporter>> + Send + Sync>;

pub struct ExporterRegistry {
    factories: Mutex<HashMap<String, ExporterFactory>>,
}

impl ExporterRegistry {
    /// A registry seeded with the built-in default entry, so it is never
    /// empty.
    pub fn new() -> Self {
        let mut factories: HashMap<String, ExporterFactory> = HashMap::new();
        factories.insert(
            DEFAULT_EXPORTER_NAME.to_string(),
            Arc::new(|| {
                Box::pin(async { Exporter::new(Arc::new(SpanPublishSink::new(DEFAULT_EXPORTER_NAME))) })
            }),
        );
        Self {
            factories: Mutex::new(factories),
        }
    }

    /// Register a factory under `name`. Name collisions fail here, at
    /// registration time, not at run time.
    pub async fn add<F, Fut>(&self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Arc<Exporter>> + Send + 'static,
    {
        let name = name.into();
        let mut factories = self.factories.lock().await;
        if factories.contains_key(&name) {
            return Err(TracewayError::DuplicateExporter(name));
        }
        factories.insert(name, Arc::new(move || Box::pin(factory())));
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut factories = self.factories.lock().await;
        factories
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| TracewayError::ExporterNotFound(name.to_string()))
    }

    /// Invoke the factory registered under `name` and return a new instance.
    /// Repeated calls return distinct objects.
    pub async fn get(&self, name: &str) -> Option<Arc<Exporter>> {
        let factory = {
            let factories = self.factories.lock().await;
            factories.get(name).map(Arc::clone)
        };
        match factory {
            Some(factory) => Some(factory().await),
            None => None,
        }
    }

    /// Fresh instances for every registered factory, produced under the lock
    /// so a concurrent add/remove cannot observe a half-updated set.
    pub async fn get_all(&self) -> HashMap<String, Arc<Exporter>> {
        let factories = self.factories.lock().await;
        let mut exporters = HashMap::with_capacity(factories.len());
        for (name, factory) in factories.iter() {
            exporters.insert(name.clone(), factory().await);
        }
        exporters
    }

    pub async fn names(&self) -> Vec<String> {
        let factories = self.factories.lock().await;
        let mut names: Vec<String> = factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.factories.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.factories.lock().await.is_empty()
    }
}

impl Default for ExporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::SpanPublishSink;

    fn make_exporter(name: &'static str) -> Arc<Exporter> {
        Exporter::new(Arc::new(SpanPublishSink::new(name)))
    }

    #[tokio::test]
    async fn seeds_the_default_entry() {
        let registry = ExporterRegistry::new();
        assert!(!registry.is_empty().await);
        assert!(registry.get(DEFAULT_EXPORTER_NAME).await.is_some());
    }

    #[tokio::test]
    async fn duplicate_names_fail_at_registration() {
        let registry = ExporterRegistry::new();
        registry
            .add("phoenix", || async { make_exporter("phoenix") })
            .await
            .unwrap();
        let err = registry
            .add("phoenix", || async { make_exporter("phoenix") })
            .await
            .unwrap_err();
        assert!(matches!(err, TracewayError::DuplicateExporter(name) if name == "phoenix"));
    }

    #[tokio::test]
    async fn remove_unknown_name_fails() {
        let registry = ExporterRegistry::new();
        let err = registry.remove("missing").await.unwrap_err();
        assert!(matches!(err, TracewayError::ExporterNotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn get_returns_a_fresh_instance_each_call() {
        let registry = ExporterRegistry::new();
        registry
            .add("fresh", || async { make_exporter("fresh") })
            .await
            .unwrap();

        let first = registry.get("fresh").await.unwrap();
        let second = registry.get("fresh").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), second.name());
        assert!(registry.get("unknown").await.is_none());
    }

    #[tokio::test]
    async fn get_all_instantiates_every_entry() {
        let registry = ExporterRegistry::new();
        registry
            .add("a", || async { make_exporter("a") })
            .await
            .unwrap();
        registry
            .add("b", || async { make_exporter("b") })
            .await
            .unwrap();

        let all = registry.get_all().await;
        assert_eq!(all.len(), 3);
        assert!(all.contains_key("a"));
        assert!(all.contains_key("b"));
        assert!(all.contains_key(DEFAULT_EXPORTER_NAME));

        registry.remove("a").await.unwrap();
        assert_eq!(registry.names().await, vec!["b", DEFAULT_EXPORTER_NAME]);
    }
}
