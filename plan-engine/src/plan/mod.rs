// Execution Plan
// Flattened, ordered steps built from a graph, configuration and mode

pub mod builder;
pub mod compute;
pub mod expectations;
pub mod join;
pub mod objects;
pub mod thunks;

pub use objects::{
    ExecutionStep, ExecutionValueSubplan, JoinMode, StepCompute, StepInput, StepKind, StepOutput,
    StepOutputHandle, EXPECTATION_INPUT, EXPECTATION_OUTPUT, FAN_IN_OUTPUT, MATERIALIZE_INPUT,
    THUNK_OUTPUT,
};

use crate::config::ResolvedConfig;
use crate::error::{EngineError, EngineResult};
use crate::graph::{GraphDefinition, ModeDefinition, NodeHandle};
use crate::storage::plugins::TypeStoragePluginRegistry;
use crate::types::RuntimeType;
use builder::PlanBuilder;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Build the plan for `graph` under `config`, using `mode` or the graph's default mode
pub fn build_plan(
    graph: &GraphDefinition,
    config: &ResolvedConfig,
    mode: Option<&str>,
) -> EngineResult<ExecutionPlan> {
    let mode = graph.mode(mode).ok_or_else(|| {
        EngineError::plan(format!(
            "graph '{}' has no mode named '{}'",
            graph.name,
            mode.unwrap_or_default()
        ))
    })?;

    let steps = PlanBuilder::new(graph, config, mode).build()?;
    let plan = ExecutionPlan::new(graph, mode, config, steps)?;

    info!(
        graph = %graph.name,
        mode = %mode.name,
        steps = plan.len(),
        "built execution plan"
    );
    Ok(plan)
}

/// Build the plan for one of the graph's presets
pub fn build_plan_for_preset(graph: &GraphDefinition, preset: &str) -> EngineResult<ExecutionPlan> {
    let preset = graph.preset(preset).ok_or_else(|| {
        EngineError::plan(format!("graph '{}' has no preset named '{}'", graph.name, preset))
    })?;
    build_plan(graph, &preset.config, Some(&preset.mode))
}

/// Immutable, indexed list of execution steps
#[derive(Clone)]
pub struct ExecutionPlan {
    graph_name: String,
    mode: ModeDefinition,
    config: Arc<ResolvedConfig>,
    steps: Vec<Arc<ExecutionStep>>,
    step_index: HashMap<String, usize>,
    node_index: BTreeMap<String, Vec<usize>>,
    /// Handles read by the plan but produced outside it (subset plans only)
    external_inputs: BTreeMap<StepOutputHandle, RuntimeType>,
    storage_plugins: TypeStoragePluginRegistry,
}

impl ExecutionPlan {
    fn new(
        graph: &GraphDefinition,
        mode: &ModeDefinition,
        config: &ResolvedConfig,
        steps: Vec<ExecutionStep>,
    ) -> EngineResult<Self> {
        let mut tagged = steps;
        for step in &mut tagged {
            for (key, value) in &config.run.tags {
                step.logging_tags
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }

        let plan = Self::index(
            graph.name.clone(),
            mode.clone(),
            Arc::new(config.clone()),
            tagged.into_iter().map(Arc::new).collect(),
            BTreeMap::new(),
            graph.storage_plugins().clone(),
        )?;
        plan.validate()?;
        Ok(plan)
    }

    fn index(
        graph_name: String,
        mode: ModeDefinition,
        config: Arc<ResolvedConfig>,
        steps: Vec<Arc<ExecutionStep>>,
        external_inputs: BTreeMap<StepOutputHandle, RuntimeType>,
        storage_plugins: TypeStoragePluginRegistry,
    ) -> EngineResult<Self> {
        let mut step_index = HashMap::with_capacity(steps.len());
        let mut node_index: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, step) in steps.iter().enumerate() {
            if step_index.insert(step.key.clone(), i).is_some() {
                return Err(EngineError::invariant(format!(
                    "duplicate step key '{}' in plan",
                    step.key
                )));
            }
            node_index
                .entry(step.node_handle.to_string())
                .or_default()
                .push(i);
        }

        Ok(Self {
            graph_name,
            mode,
            config,
            steps,
            step_index,
            node_index,
            external_inputs,
            storage_plugins,
        })
    }

    pub fn graph_name(&self) -> &str {
        &self.graph_name
    }

    pub fn mode(&self) -> &ModeDefinition {
        &self.mode
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn storage_plugins(&self) -> &TypeStoragePluginRegistry {
        &self.storage_plugins
    }

    pub fn steps(&self) -> &[Arc<ExecutionStep>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.key.as_str()).collect()
    }

    pub fn has_step(&self, key: &str) -> bool {
        self.step_index.contains_key(key)
    }

    pub fn get_step(&self, key: &str) -> Option<&Arc<ExecutionStep>> {
        self.step_index.get(key).map(|&i| &self.steps[i])
    }

    pub fn step(&self, key: &str) -> EngineResult<&Arc<ExecutionStep>> {
        self.get_step(key)
            .ok_or_else(|| EngineError::StepNotFound(key.to_string()))
    }

    /// Position of a step in plan order
    pub fn position(&self, key: &str) -> Option<usize> {
        self.step_index.get(key).copied()
    }

    /// Steps synthesized for one node, in plan order
    pub fn steps_for_node(&self, handle: &NodeHandle) -> Vec<&Arc<ExecutionStep>> {
        self.node_index
            .get(&handle.to_string())
            .map(|indices| indices.iter().map(|&i| &self.steps[i]).collect())
            .unwrap_or_default()
    }

    pub fn external_inputs(&self) -> &BTreeMap<StepOutputHandle, RuntimeType> {
        &self.external_inputs
    }

    /// Declared type of a handle produced by a step in the plan or read from outside it
    pub fn output_type(&self, handle: &StepOutputHandle) -> Option<&RuntimeType> {
        if let Some(ty) = self.external_inputs.get(handle) {
            return Some(ty);
        }
        self.get_step(&handle.step_key)
            .and_then(|s| s.output(&handle.output_name))
            .map(|o| &o.runtime_type)
    }

    /// Every step input must read an earlier step's declared output or an external input
    pub fn validate(&self) -> EngineResult<()> {
        for (i, step) in self.steps.iter().enumerate() {
            for input in &step.inputs {
                if self.external_inputs.contains_key(&input.upstream) {
                    continue;
                }
                match self.step_index.get(&input.upstream.step_key) {
                    Some(&j) if j < i => {
                        if self.steps[j].output(&input.upstream.output_name).is_none() {
                            return Err(EngineError::invariant(format!(
                                "step '{}' reads undeclared output {}",
                                step.key, input.upstream
                            )));
                        }
                    }
                    Some(_) => {
                        return Err(EngineError::invariant(format!(
                            "step '{}' reads {} before it is produced",
                            step.key, input.upstream
                        )))
                    }
                    None => {
                        return Err(EngineError::invariant(format!(
                            "step '{}' reads {} from a step outside the plan",
                            step.key, input.upstream
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// Restrict the plan to `keys`; upstream outputs of dropped steps become external inputs
    pub fn build_subset_plan(&self, keys: &[&str]) -> EngineResult<ExecutionPlan> {
        let mut selected = BTreeSet::new();
        for key in keys {
            if !self.has_step(key) {
                return Err(EngineError::StepNotFound(key.to_string()));
            }
            selected.insert(*key);
        }

        let steps: Vec<Arc<ExecutionStep>> = self
            .steps
            .iter()
            .filter(|s| selected.contains(s.key.as_str()))
            .cloned()
            .collect();

        let mut external_inputs = BTreeMap::new();
        for step in &steps {
            for input in &step.inputs {
                if selected.contains(input.upstream.step_key.as_str()) {
                    continue;
                }
                let ty = self.output_type(&input.upstream).ok_or_else(|| {
                    EngineError::invariant(format!(
                        "step '{}' reads {} which the plan does not produce",
                        step.key, input.upstream
                    ))
                })?;
                external_inputs.insert(input.upstream.clone(), ty.clone());
            }
        }

        let plan = Self::index(
            self.graph_name.clone(),
            self.mode.clone(),
            self.config.clone(),
            steps,
            external_inputs,
            self.storage_plugins.clone(),
        )?;
        plan.validate()?;
        Ok(plan)
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("graph", &self.graph_name)
            .field("mode", &self.mode.name)
            .field("steps", &self.keys())
            .field("external_inputs", &self.external_inputs.keys().collect::<Vec<_>>())
            .finish()
    }
}
