// In-Memory Intermediates
// Process-local intermediates keyed by run; values are dropped with the store

use crate::error::{EngineError, EngineResult};
use crate::plan::StepOutputHandle;
use crate::storage::IntermediateStore;
use crate::types::{RuntimeType, Value};

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type RunValues = HashMap<StepOutputHandle, Value>;

/// Ephemeral store; write-once per (run id, handle) like the durable backends
#[derive(Debug, Default)]
pub struct InMemoryIntermediateStore {
    runs: RwLock<HashMap<String, RunValues>>,
}

impl InMemoryIntermediateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_runs(&self) -> RwLockReadGuard<'_, HashMap<String, RunValues>> {
        self.runs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_runs(&self) -> RwLockWriteGuard<'_, HashMap<String, RunValues>> {
        self.runs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of values stored for a run
    pub fn len(&self, run_id: &str) -> usize {
        self.read_runs().get(run_id).map(|r| r.len()).unwrap_or(0)
    }

    /// Drop every value of a run
    pub fn clear_run(&self, run_id: &str) {
        self.write_runs().remove(run_id);
    }
}

impl IntermediateStore for InMemoryIntermediateStore {
    fn label(&self) -> &str {
        "in_memory"
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn has_value(&self, run_id: &str, handle: &StepOutputHandle) -> bool {
        self.read_runs()
            .get(run_id)
            .map(|r| r.contains_key(handle))
            .unwrap_or(false)
    }

    fn set_value(
        &self,
        run_id: &str,
        handle: &StepOutputHandle,
        _runtime_type: &RuntimeType,
        value: &Value,
    ) -> EngineResult<()> {
        let mut runs = self.write_runs();
        let values = runs.entry(run_id.to_string()).or_default();
        if values.contains_key(handle) {
            return Err(EngineError::DuplicateWrite {
                run_id: run_id.to_string(),
                handle: handle.clone(),
            });
        }
        values.insert(handle.clone(), value.clone());
        Ok(())
    }

    fn read_value(
        &self,
        run_id: &str,
        handle: &StepOutputHandle,
        _runtime_type: &RuntimeType,
    ) -> EngineResult<Value> {
        self.read_runs()
            .get(run_id)
            .and_then(|r| r.get(handle))
            .cloned()
            .ok_or_else(|| EngineError::MissingIntermediate {
                run_id: run_id.to_string(),
                handle: handle.clone(),
            })
    }

    fn copy_from_prior_run(
        &self,
        src_run_id: &str,
        dst_run_id: &str,
        handle: &StepOutputHandle,
    ) -> EngineResult<()> {
        let value = self.read_value(src_run_id, handle, &RuntimeType::Any)?;
        self.set_value(dst_run_id, handle, &RuntimeType::Any, &value)
    }
}
