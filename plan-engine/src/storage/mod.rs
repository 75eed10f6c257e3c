// Intermediates Storage
// Run-scoped, write-once storage of step outputs with pluggable backends

pub mod codec;
pub mod durable;
pub mod memory;
pub mod object_store;
pub mod plugins;

pub use codec::{Codec, JsonCodec, TextCodec, YamlCodec};
pub use durable::ObjectStoreIntermediateStore;
pub use memory::InMemoryIntermediateStore;
pub use object_store::{FilesystemObjectStore, MemoryObjectStore, ObjectStore, ObjectStoreRegistry};
pub use plugins::{TypeStoragePlugin, TypeStoragePluginRegistry};

use crate::config::{default_storage_root, StorageConfig};
use crate::error::{EngineError, EngineResult};
use crate::plan::{ExecutionStep, StepOutputHandle};
use crate::types::{RuntimeType, Value};

use std::sync::Arc;

/// Keyed storage of step outputs; every value is addressed by (run id, step output handle)
pub trait IntermediateStore: Send + Sync {
    /// Short backend name for logs
    fn label(&self) -> &str;

    /// Whether values outlive the process
    fn is_durable(&self) -> bool;

    /// Never fails; false when absent
    fn has_value(&self, run_id: &str, handle: &StepOutputHandle) -> bool;

    /// Store a value; a second write to the same handle is `DuplicateWrite`
    fn set_value(
        &self,
        run_id: &str,
        handle: &StepOutputHandle,
        runtime_type: &RuntimeType,
        value: &Value,
    ) -> EngineResult<()>;

    /// Read a copy of a stored value; `MissingIntermediate` when absent
    fn read_value(
        &self,
        run_id: &str,
        handle: &StepOutputHandle,
        runtime_type: &RuntimeType,
    ) -> EngineResult<Value>;

    /// Copy one value written by a prior run into `dst_run_id`
    fn copy_from_prior_run(
        &self,
        src_run_id: &str,
        dst_run_id: &str,
        handle: &StepOutputHandle,
    ) -> EngineResult<()>;

    /// True when every input of `step` has a stored upstream value
    fn all_inputs_covered(&self, run_id: &str, step: &ExecutionStep) -> bool {
        step.inputs
            .iter()
            .all(|input| self.has_value(run_id, &input.upstream))
    }

    /// Location of a stored value, for backends that have one
    fn uri_for(&self, _run_id: &str, _handle: &StepOutputHandle) -> Option<String> {
        None
    }
}

/// Create the intermediates backend selected by `config`
pub fn store_from_config(
    config: &StorageConfig,
    plugins: &TypeStoragePluginRegistry,
    object_stores: &ObjectStoreRegistry,
) -> EngineResult<Arc<dyn IntermediateStore>> {
    match config {
        StorageConfig::InMemory => Ok(Arc::new(InMemoryIntermediateStore::new())),
        StorageConfig::Filesystem { base_dir } => {
            let root = base_dir.clone().unwrap_or_else(default_storage_root);
            let store = FilesystemObjectStore::new(root);
            Ok(Arc::new(ObjectStoreIntermediateStore::new(
                "filesystem",
                Arc::new(store),
                plugins.clone(),
            )))
        }
        StorageConfig::ObjectStore { name } => {
            let store = object_stores.get(name).ok_or_else(|| {
                EngineError::config(format!("no object store registered under '{}'", name))
            })?;
            Ok(Arc::new(ObjectStoreIntermediateStore::new(
                name.clone(),
                store,
                plugins.clone(),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_from_config_selects_backend() {
        let plugins = TypeStoragePluginRegistry::new();
        let mut registry = ObjectStoreRegistry::new();
        registry.register("scratch", Arc::new(MemoryObjectStore::new()));

        let memory = store_from_config(&StorageConfig::InMemory, &plugins, &registry).unwrap();
        assert_eq!(memory.label(), "in_memory");
        assert!(!memory.is_durable());

        let dir = tempfile::tempdir().unwrap();
        let fs = store_from_config(&StorageConfig::filesystem(dir.path()), &plugins, &registry)
            .unwrap();
        assert_eq!(fs.label(), "filesystem");
        assert!(fs.is_durable());

        let named = store_from_config(
            &StorageConfig::ObjectStore {
                name: "scratch".to_string(),
            },
            &plugins,
            &registry,
        )
        .unwrap();
        assert_eq!(named.label(), "scratch");

        let missing = store_from_config(
            &StorageConfig::ObjectStore {
                name: "s3".to_string(),
            },
            &plugins,
            &registry,
        );
        assert!(matches!(missing, Err(EngineError::Config(_))));
    }
}
