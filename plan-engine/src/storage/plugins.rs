// Type Storage Plugins
// Per-type codec overrides for durable storage, looked up by declared type name

use crate::error::{EngineError, EngineResult};
use crate::graph::GraphError;
use crate::storage::codec::{Codec, JsonCodec};
use crate::types::RuntimeType;

use std::collections::BTreeMap;
use std::sync::Arc;

/// Overrides how values of one named type are stored
#[derive(Debug, Clone)]
pub struct TypeStoragePlugin {
    pub type_name: String,
    pub codec: Arc<dyn Codec>,
}

impl TypeStoragePlugin {
    pub fn new(type_name: impl Into<String>, codec: impl Codec + 'static) -> Self {
        Self {
            type_name: type_name.into(),
            codec: Arc::new(codec),
        }
    }
}

/// Registry of storage plugins keyed by type name
#[derive(Debug, Clone, Default)]
pub struct TypeStoragePluginRegistry {
    plugins: BTreeMap<String, TypeStoragePlugin>,
}

impl TypeStoragePluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: TypeStoragePlugin) -> Result<(), GraphError> {
        if self.plugins.contains_key(&plugin.type_name) {
            return Err(GraphError::invalid_structure(format!(
                "storage plugin for type '{}' registered more than once",
                plugin.type_name
            )));
        }
        self.plugins.insert(plugin.type_name.clone(), plugin);
        Ok(())
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeStoragePlugin> {
        self.plugins.get(type_name)
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Codec for values of `runtime_type`, falling back to JSON
    pub fn codec_for(&self, runtime_type: &RuntimeType) -> Arc<dyn Codec> {
        match self.plugins.get(&runtime_type.name()) {
            Some(plugin) => plugin.codec.clone(),
            None => Arc::new(JsonCodec),
        }
    }

    /// Reject list/nullable types wrapping a type that needs a plugin
    pub fn check_supported(&self, runtime_type: &RuntimeType) -> EngineResult<()> {
        if !runtime_type.is_composite() {
            return Ok(());
        }
        for inner in runtime_type.inner_types() {
            if self.plugins.contains_key(&inner.name()) {
                return Err(EngineError::UnsupportedCompositeStorage {
                    type_name: runtime_type.name(),
                    inner_type: inner.name(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::codec::TextCodec;

    fn make_registry() -> TypeStoragePluginRegistry {
        let mut registry = TypeStoragePluginRegistry::new();
        registry
            .register(TypeStoragePlugin::new("Report", TextCodec))
            .unwrap();
        registry
    }

    #[test]
    fn test_codec_lookup_by_type_name() {
        let registry = make_registry();
        assert_eq!(registry.codec_for(&RuntimeType::named("Report")).name(), "text");
        assert_eq!(registry.codec_for(&RuntimeType::Int).name(), "json");
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = make_registry();
        assert!(registry
            .register(TypeStoragePlugin::new("Report", TextCodec))
            .is_err());
    }

    #[test]
    fn test_composite_over_plugin_type_rejected() {
        let registry = make_registry();
        let ty = RuntimeType::list(RuntimeType::nullable(RuntimeType::named("Report")));
        match registry.check_supported(&ty) {
            Err(EngineError::UnsupportedCompositeStorage { inner_type, .. }) => {
                assert_eq!(inner_type, "Report")
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(registry.check_supported(&RuntimeType::named("Report")).is_ok());
        assert!(registry
            .check_supported(&RuntimeType::list(RuntimeType::Int))
            .is_ok());
    }
}
