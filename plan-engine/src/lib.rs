// Plan Engine Library
// Builds execution plans from computation graphs and runs them against an intermediates store

pub mod config;
pub mod error;
pub mod execution;
pub mod graph;
pub mod plan;
pub mod repository;
pub mod storage;
pub mod types;

#[cfg(test)]
mod fixtures;

// Re-export commonly used types
pub use error::{BoxError, EngineError, EngineResult, StepErrorKind, StepExecutionError};

pub use config::{
    ExecutionConfig, ExecutionMode, FileFormat, InputSource, MaterializationFormat, NodeConfig,
    OutputTarget, ResolvedConfig, StorageConfig,
};

pub use graph::{
    CompositeBuilder, ExpectationDefinition, ExpectationResult, GraphBuilder, GraphDefinition,
    GraphError, GraphErrorKind, InputDefinition, ModeDefinition, NodeDefinition, NodeHandle,
    OutputDefinition, PresetDefinition,
};

pub use plan::{
    build_plan, build_plan_for_preset, ExecutionPlan, ExecutionStep, StepKind, StepOutputHandle,
};

pub use storage::{
    store_from_config, FilesystemObjectStore, InMemoryIntermediateStore, IntermediateStore,
    ObjectStore, ObjectStoreIntermediateStore, ObjectStoreRegistry, TypeStoragePlugin,
};

pub use execution::{
    execute, execute_subset, progress_channel, AcquiredResource, ComputeContext, ExecutionEvent,
    ExecutorConfig, LogLevel, LogSink, PlanExecutor, ProgressSender, ResourceDefinition,
    RunResult, StepState, TracingLogSink,
};

pub use repository::Repository;
pub use types::{RuntimeType, Value};
