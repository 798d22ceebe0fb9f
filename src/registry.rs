// ABOUTME: Module registry: ordered, name-keyed set of live responder modules.
// ABOUTME: Registration order is the documented arbitration tie-break priority.

use std::collections::HashMap;
use std::sync::Arc;

use quorum_core::{ChatModule, CoreError};

/// Registry of all registered responder modules.
///
/// Built once at startup from the configuration allow-list and read-only
/// afterward, so concurrent lookup needs no locking. The registry exclusively
/// owns the live module instances for the process lifetime.
///
/// Iteration order is registration order; the dispatcher relies on this for
/// its deterministic first-registered-wins tie-break.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn ChatModule>>,
    index: HashMap<String, usize>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. Duplicate names are a fatal configuration error.
    pub fn register(&mut self, module: Arc<dyn ChatModule>) -> Result<(), CoreError> {
        let name = module.name().to_string();
        if self.index.contains_key(&name) {
            return Err(CoreError::DuplicateModuleName(name));
        }
        self.index.insert(name, self.modules.len());
        self.modules.push(module);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ChatModule>> {
        self.index.get(name).map(|&i| &self.modules[i])
    }

    /// Modules in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ChatModule>> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name().to_string()).collect()
    }

    /// Validate every declared integration test case. Startup-fatal on error.
    pub fn validate_test_cases(&self) -> Result<(), CoreError> {
        for module in &self.modules {
            for case in module.test_cases() {
                case.validate(module.name())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use quorum_core::{Candidate, DispatchContext, IntegrationTestCase, NormalizedMessage};

    struct NamedModule {
        name: &'static str,
        cases: Vec<IntegrationTestCase>,
    }

    impl NamedModule {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                cases: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl ChatModule for NamedModule {
        fn name(&self) -> &str {
            self.name
        }

        async fn evaluate(
            &self,
            _message: &NormalizedMessage,
            _ctx: &DispatchContext,
        ) -> Result<Candidate> {
            Ok(Candidate::none())
        }

        fn test_cases(&self) -> Vec<IntegrationTestCase> {
            self.cases.clone()
        }
    }

    #[test]
    fn test_registration_preserves_order() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(NamedModule::new("alpha"))).unwrap();
        registry.register(Arc::new(NamedModule::new("beta"))).unwrap();
        registry.register(Arc::new(NamedModule::new("gamma"))).unwrap();

        assert_eq!(registry.names(), vec!["alpha", "beta", "gamma"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_name_is_fatal() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(NamedModule::new("alpha"))).unwrap();
        let err = registry
            .register(Arc::new(NamedModule::new("alpha")))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateModuleName(name) if name == "alpha"));
        // The first registration is untouched
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_by_name() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(NamedModule::new("alpha"))).unwrap();
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_validate_test_cases_rejects_bad_declaration() {
        let mut registry = ModuleRegistry::new();
        let mut module = NamedModule::new("alpha");
        module.cases.push(IntegrationTestCase::fuzzy("q", "a", 2.0));
        registry.register(Arc::new(module)).unwrap();

        let err = registry.validate_test_cases().unwrap_err();
        assert!(matches!(err, CoreError::MisconfiguredTestCase { module, .. } if module == "alpha"));
    }

    #[test]
    fn test_empty_registry() {
        let registry = ModuleRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.validate_test_cases().is_ok());
    }
}
