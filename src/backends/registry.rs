// ABOUTME: Registry pattern for runtime generation backend selection
// ABOUTME: Backends register factories, natter creates one by name from config

use super::{KoboldBackend, OpenAiBackend};
use anyhow::{anyhow, Result};
use natter_core::config::BackendConfig;
use natter_core::traits::GenerationBackend;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory function that builds a backend from config
pub type BackendFactory =
    Box<dyn Fn(&BackendConfig) -> Result<Arc<dyn GenerationBackend>> + Send + Sync>;

/// Registry for runtime backend selection
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory by name
    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&BackendConfig) -> Result<Arc<dyn GenerationBackend>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }

    /// Create a backend by name with the given config
    pub fn create(&self, name: &str, config: &BackendConfig) -> Result<Arc<dyn GenerationBackend>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "Unknown backend: {} (available: {})",
                name,
                self.available().join(", ")
            )
        })?;
        factory(config)
    }

    /// List available backend names, sorted
    pub fn available(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Create the backend named by `config.backend_type`
    pub fn create_from_config(&self, config: &BackendConfig) -> Result<Arc<dyn GenerationBackend>> {
        let backend = self.create(&config.backend_type, config)?;
        tracing::info!(backend = backend.name(), "Generation backend ready");
        Ok(backend)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
            .register("openai", OpenAiBackend::factory())
            .register("openrouter", OpenAiBackend::factory())
            .register("kobold", KoboldBackend::factory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_names() {
        let registry = BackendRegistry::default();
        assert_eq!(registry.available(), vec!["kobold", "openai", "openrouter"]);
    }

    #[test]
    fn test_create_known_backend() {
        let registry = BackendRegistry::default();
        let config = BackendConfig {
            backend_type: "kobold".to_string(),
            ..BackendConfig::default()
        };
        let backend = registry.create_from_config(&config).unwrap();
        assert_eq!(backend.name(), "kobold");
        assert!(backend.splits_lines());
    }

    #[test]
    fn test_unknown_backend_lists_alternatives() {
        let registry = BackendRegistry::default();
        let err = registry
            .create("gpt-in-a-box", &BackendConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("Unknown backend: gpt-in-a-box"));
        assert!(err.to_string().contains("kobold, openai, openrouter"));
    }
}
