//! Central registry for all convergence modules

use crate::modules::interface::ConvergenceModule;
use std::collections::HashMap;

/// Central registry for all convergence modules
pub struct ModuleRegistry {
    modules: HashMap<String, Box<dyn ConvergenceModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Create a registry with all core modules pre-registered
    pub fn with_core_modules() -> Self {
        let mut registry = Self::new();

        registry.register(Box::new(crate::modules::core::BootstrapModule));
        registry.register(Box::new(crate::modules::core::UserModule));
        registry.register(Box::new(crate::modules::core::PackageModule));
        registry.register(Box::new(crate::modules::core::FileModule));
        registry.register(Box::new(crate::modules::core::AuthorizedKeyModule));
        registry.register(Box::new(crate::modules::core::CommandModule));

        registry
    }

    pub fn register(&mut self, module: Box<dyn ConvergenceModule>) {
        self.modules.insert(module.name().to_string(), module);
    }

    pub fn get_module(&self, name: &str) -> Option<&dyn ConvergenceModule> {
        self.modules.get(name).map(|m| m.as_ref())
    }

    pub fn list_modules(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
