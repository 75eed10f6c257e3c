// Durable Intermediates
// Intermediates serialized with type codecs into an object store

use crate::error::{EngineError, EngineResult};
use crate::plan::StepOutputHandle;
use crate::storage::object_store::ObjectStore;
use crate::storage::plugins::TypeStoragePluginRegistry;
use crate::storage::IntermediateStore;
use crate::types::{RuntimeType, Value};

use std::sync::Arc;
use tracing::debug;

/// Stores each value at `<run_id>/intermediates/<step_key>/<output_name>`
#[derive(Debug, Clone)]
pub struct ObjectStoreIntermediateStore {
    label: String,
    store: Arc<dyn ObjectStore>,
    plugins: TypeStoragePluginRegistry,
}

impl ObjectStoreIntermediateStore {
    pub fn new(
        label: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        plugins: TypeStoragePluginRegistry,
    ) -> Self {
        Self {
            label: label.into(),
            store,
            plugins,
        }
    }

    pub fn object_key(run_id: &str, handle: &StepOutputHandle) -> String {
        format!(
            "{}/intermediates/{}/{}",
            run_id, handle.step_key, handle.output_name
        )
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

impl IntermediateStore for ObjectStoreIntermediateStore {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn has_value(&self, run_id: &str, handle: &StepOutputHandle) -> bool {
        self.store.has_object(&Self::object_key(run_id, handle))
    }

    fn set_value(
        &self,
        run_id: &str,
        handle: &StepOutputHandle,
        runtime_type: &RuntimeType,
        value: &Value,
    ) -> EngineResult<()> {
        let key = Self::object_key(run_id, handle);
        if self.store.has_object(&key) {
            return Err(EngineError::DuplicateWrite {
                run_id: run_id.to_string(),
                handle: handle.clone(),
            });
        }

        if let Some(bad) = value.find_non_finite() {
            return Err(EngineError::codec(format!(
                "cannot store non-finite float {} at {}",
                bad, key
            )));
        }

        let codec = self.plugins.codec_for(runtime_type);
        let bytes = codec.encode(value)?;
        debug!(key = %key, codec = codec.name(), bytes = bytes.len(), "writing intermediate");
        self.store.set_object(&key, &bytes)
    }

    fn read_value(
        &self,
        run_id: &str,
        handle: &StepOutputHandle,
        runtime_type: &RuntimeType,
    ) -> EngineResult<Value> {
        let key = Self::object_key(run_id, handle);
        if !self.store.has_object(&key) {
            return Err(EngineError::MissingIntermediate {
                run_id: run_id.to_string(),
                handle: handle.clone(),
            });
        }

        let bytes = self.store.get_object(&key)?;
        self.plugins.codec_for(runtime_type).decode(&bytes)
    }

    fn copy_from_prior_run(
        &self,
        src_run_id: &str,
        dst_run_id: &str,
        handle: &StepOutputHandle,
    ) -> EngineResult<()> {
        let src = Self::object_key(src_run_id, handle);
        let dst = Self::object_key(dst_run_id, handle);
        if !self.store.has_object(&src) {
            return Err(EngineError::MissingIntermediate {
                run_id: src_run_id.to_string(),
                handle: handle.clone(),
            });
        }
        if self.store.has_object(&dst) {
            return Err(EngineError::DuplicateWrite {
                run_id: dst_run_id.to_string(),
                handle: handle.clone(),
            });
        }
        debug!(from = %src, to = %dst, "copying intermediate from prior run");
        self.store.cp_object(&src, &dst)
    }

    fn uri_for(&self, run_id: &str, handle: &StepOutputHandle) -> Option<String> {
        Some(self.store.uri_for_key(&Self::object_key(run_id, handle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::codec::TextCodec;
    use crate::storage::object_store::{FilesystemObjectStore, MemoryObjectStore};
    use crate::storage::plugins::TypeStoragePlugin;
    use std::collections::BTreeMap;

    fn filesystem_store(root: &std::path::Path) -> ObjectStoreIntermediateStore {
        ObjectStoreIntermediateStore::new(
            "filesystem",
            Arc::new(FilesystemObjectStore::new(root)),
            TypeStoragePluginRegistry::new(),
        )
    }

    #[test]
    fn test_layout_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = filesystem_store(dir.path());
        let handle = StepOutputHandle::new("add_one.compute", "result");

        store
            .set_value("run-a", &handle, &RuntimeType::Int, &Value::from(2i64))
            .unwrap();

        let path = dir
            .path()
            .join("run-a")
            .join("intermediates")
            .join("add_one.compute")
            .join("result");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "2");
        assert!(store.uri_for("run-a", &handle).unwrap().starts_with("file://"));
    }

    #[test]
    fn test_round_trip_structured_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = filesystem_store(dir.path());
        let handle = StepOutputHandle::new("load.compute", "rows");

        let mut row = BTreeMap::new();
        row.insert("id".to_string(), Value::from(1i64));
        row.insert("name".to_string(), Value::from("ada"));
        let value = Value::from(vec![Value::Object(row), Value::Null]);

        store
            .set_value("r", &handle, &RuntimeType::Any, &value)
            .unwrap();
        assert_eq!(store.read_value("r", &handle, &RuntimeType::Any).unwrap(), value);
    }

    #[test]
    fn test_integers_beyond_f64_precision_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = filesystem_store(dir.path());
        let handle = StepOutputHandle::new("ids.compute", "result");
        let id = 9_007_199_254_740_993i64;

        store
            .set_value("r", &handle, &RuntimeType::Int, &Value::from(id))
            .unwrap();

        let back = store.read_value("r", &handle, &RuntimeType::Int).unwrap();
        assert!(matches!(back, Value::Int(n) if n == id));
    }

    #[test]
    fn test_non_finite_floats_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = filesystem_store(dir.path());
        let handle = StepOutputHandle::new("ratio.compute", "result");

        let err = store
            .set_value("r", &handle, &RuntimeType::Float, &Value::from(f64::NAN))
            .unwrap_err();
        assert!(matches!(err, EngineError::Codec(_)));
        assert!(!store.has_value("r", &handle));

        let nested = Value::from(vec![Value::from(1.5), Value::from(f64::NEG_INFINITY)]);
        assert!(store
            .set_value("r", &handle, &RuntimeType::Any, &nested)
            .is_err());

        store
            .set_value("r", &handle, &RuntimeType::Float, &Value::from(0.25))
            .unwrap();
        assert_eq!(
            store.read_value("r", &handle, &RuntimeType::Float).unwrap(),
            Value::from(0.25)
        );
    }

    #[test]
    fn test_write_once_and_missing() {
        let store = ObjectStoreIntermediateStore::new(
            "scratch",
            Arc::new(MemoryObjectStore::new()),
            TypeStoragePluginRegistry::new(),
        );
        let handle = StepOutputHandle::new("a.compute", "result");

        assert!(matches!(
            store.read_value("r", &handle, &RuntimeType::Int),
            Err(EngineError::MissingIntermediate { .. })
        ));
        store
            .set_value("r", &handle, &RuntimeType::Int, &Value::from(1i64))
            .unwrap();
        assert!(matches!(
            store.set_value("r", &handle, &RuntimeType::Int, &Value::from(1i64)),
            Err(EngineError::DuplicateWrite { .. })
        ));
    }

    #[test]
    fn test_plugin_codec_used_for_named_type() {
        let mut plugins = TypeStoragePluginRegistry::new();
        plugins
            .register(TypeStoragePlugin::new("Report", TextCodec))
            .unwrap();
        let objects = Arc::new(MemoryObjectStore::new());
        let store = ObjectStoreIntermediateStore::new("scratch", objects.clone(), plugins);
        let handle = StepOutputHandle::new("report.compute", "result");

        store
            .set_value("r", &handle, &RuntimeType::named("Report"), &Value::from("all good"))
            .unwrap();

        let raw = objects
            .get_object("r/intermediates/report.compute/result")
            .unwrap();
        assert_eq!(raw, b"all good".to_vec());
        assert_eq!(
            store
                .read_value("r", &handle, &RuntimeType::named("Report"))
                .unwrap(),
            Value::from("all good")
        );
    }

    #[test]
    fn test_copy_from_prior_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = filesystem_store(dir.path());
        let handle = StepOutputHandle::new("add_one.compute", "result");

        store
            .set_value("a", &handle, &RuntimeType::Int, &Value::from(2i64))
            .unwrap();
        store.copy_from_prior_run("a", "b", &handle).unwrap();

        assert!(store.has_value("b", &handle));
        assert_eq!(
            store.read_value("b", &handle, &RuntimeType::Int).unwrap(),
            Value::from(2i64)
        );
        assert!(matches!(
            store.copy_from_prior_run("a", "b", &handle),
            Err(EngineError::DuplicateWrite { .. })
        ));
        assert!(matches!(
            store.copy_from_prior_run("zzz", "c", &handle),
            Err(EngineError::MissingIntermediate { .. })
        ));
    }
}
