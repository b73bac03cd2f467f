//! Module registry
//!
//! Populated once at startup and read-only afterwards, so it is shared
//! between connection handlers behind a plain `Arc` with no lock.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use bulwark_core::ModuleDescriptor;

use crate::module::CapabilityModule;

/// Errors raised by registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("module already registered: {0}")]
    DuplicateModule(String),

    #[error("module not found: {0}")]
    ModuleNotFound(String),
}

struct Entry {
    module: Arc<dyn CapabilityModule>,
    descriptor: ModuleDescriptor,
}

/// Name-to-module map that also remembers registration order
#[derive(Default)]
pub struct ModuleRegistry {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an initialized module under its own name
    pub fn register(&mut self, module: Box<dyn CapabilityModule>) -> Result<(), RegistryError> {
        let name = module.name().to_string();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::DuplicateModule(name));
        }

        // Captured once so discovery and capability checks agree for the daemon's lifetime
        let descriptor = module.descriptor();
        debug!(
            "Registered module {} v{} ({} actions)",
            name,
            descriptor.version,
            descriptor.capabilities.len()
        );

        self.entries.insert(
            name.clone(),
            Entry {
                module: Arc::from(module),
                descriptor,
            },
        );
        self.order.push(name);
        Ok(())
    }

    /// Look up a module by exact name
    pub fn resolve(&self, name: &str) -> Result<&Arc<dyn CapabilityModule>, RegistryError> {
        self.entries
            .get(name)
            .map(|entry| &entry.module)
            .ok_or_else(|| RegistryError::ModuleNotFound(name.to_string()))
    }

    pub fn descriptor(&self, name: &str) -> Result<&ModuleDescriptor, RegistryError> {
        self.entries
            .get(name)
            .map(|entry| &entry.descriptor)
            .ok_or_else(|| RegistryError::ModuleNotFound(name.to_string()))
    }

    /// Descriptors of every module, in registration order
    pub fn list(&self) -> Vec<&ModuleDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| &entry.descriptor)
            .collect()
    }

    /// Module names, in registration order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Shut every module down, last registered first
    pub async fn shutdown_all(&self) {
        for name in self.order.iter().rev() {
            if let Some(entry) = self.entries.get(name) {
                info!("Shutting down module {}", name);
                entry.module.shutdown().await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::module::{ModuleError, ModuleResult};
    use async_trait::async_trait;
    use bulwark_core::{ActionDescriptor, Parameters};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Minimal module used across the crate's unit tests
    pub(crate) struct StubModule {
        pub name: &'static str,
        pub calls: Arc<AtomicUsize>,
        pub shutdowns: Arc<AtomicUsize>,
    }

    impl StubModule {
        pub fn new(name: &'static str) -> Self {
            Self {
                name,
                calls: Arc::new(AtomicUsize::new(0)),
                shutdowns: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl CapabilityModule for StubModule {
        fn name(&self) -> &str {
            self.name
        }

        fn version(&self) -> &str {
            "0.0.1"
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn capabilities(&self) -> Vec<ActionDescriptor> {
            vec![
                ActionDescriptor::new("echo", "Echo parameters"),
                ActionDescriptor::new("fail", "Always fails"),
                ActionDescriptor::new("sleep", "Sleeps for `ms`"),
                ActionDescriptor::new("panic", "Panics"),
            ]
        }

        async fn initialize(&mut self) -> ModuleResult<()> {
            Ok(())
        }

        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }

        async fn execute(&self, action: &str, parameters: &Parameters) -> ModuleResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match action {
                "echo" => Ok(json!({ "echo": parameters })),
                "fail" => Err(ModuleError::Internal("stub failure".into())),
                "sleep" => {
                    let ms = parameters.get("ms").and_then(Value::as_u64).unwrap_or(0);
                    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                    Ok(json!({ "slept_ms": ms }))
                }
                "panic" => panic!("stub panic"),
                other => Err(ModuleError::UnsupportedAction(other.to_string())),
            }
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ModuleRegistry::new();
        registry.register(Box::new(StubModule::new("alpha"))).unwrap();

        assert_eq!(registry.resolve("alpha").unwrap().name(), "alpha");
        assert_eq!(
            registry.resolve("Alpha").err(),
            Some(RegistryError::ModuleNotFound("Alpha".into()))
        );
    }

    #[test]
    fn test_duplicate_rejected_and_first_kept() {
        let mut registry = ModuleRegistry::new();
        let first = StubModule::new("alpha");
        let first_calls = Arc::clone(&first.calls);
        registry.register(Box::new(first)).unwrap();

        let err = registry
            .register(Box::new(StubModule::new("alpha")))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateModule("alpha".into()));
        assert_eq!(registry.len(), 1);

        let module = Arc::clone(registry.resolve("alpha").unwrap());
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(module.execute("echo", &Parameters::new()))
            .unwrap();
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_list_preserves_registration_order() {
        let mut registry = ModuleRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(Box::new(StubModule::new(name))).unwrap();
        }

        let names: Vec<_> = registry.list().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(registry.names(), ["zeta", "alpha", "mid"]);
        assert_eq!(registry.list(), registry.list());
    }

    #[test]
    fn test_empty_registry() {
        let registry = ModuleRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let mut registry = ModuleRegistry::new();
        let a = StubModule::new("a");
        let b = StubModule::new("b");
        let (sa, sb) = (Arc::clone(&a.shutdowns), Arc::clone(&b.shutdowns));
        registry.register(Box::new(a)).unwrap();
        registry.register(Box::new(b)).unwrap();

        registry.shutdown_all().await;
        assert_eq!(sa.load(Ordering::SeqCst), 1);
        assert_eq!(sb.load(Ordering::SeqCst), 1);
    }
}
