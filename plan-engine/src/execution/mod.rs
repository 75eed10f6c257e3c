// Execution Module
// Step execution, run coordination, resources and run events

pub mod context;
pub mod coordinator;
pub mod events;
pub mod resources;
pub mod step;

// Re-export key types
pub use context::{ComputeContext, StepEvent};
pub use coordinator::{
    ExecutorConfig, PlanExecutor, RunResult, SchedulingMode, StepRecord, StepState,
};
pub use events::{
    progress_channel, progress_stream, EventSender, ExecutionEvent, LogLevel, LogRecord, LogSink,
    MemoryLogSink, ProgressReceiver, ProgressSender, TracingLogSink,
};
pub use resources::{AcquiredResource, ResourceDefinition, ResourceFactory, ResourceView, Resources};
pub use step::{StepExecutor, StepOutcome};

use crate::error::EngineResult;
use crate::plan::ExecutionPlan;
use crate::storage::IntermediateStore;

use std::sync::Arc;

/// Execute `plan` against `store` with the scheduling its configuration selects
pub async fn execute(
    plan: &ExecutionPlan,
    run_id: Option<String>,
    store: Arc<dyn IntermediateStore>,
) -> EngineResult<RunResult> {
    let config = ExecutorConfig::from_config(&plan.config().execution)?;
    PlanExecutor::new(store)
        .with_config(config)
        .execute(plan, run_id)
        .await
}

/// Re-execute `step_keys` of `plan`, reading the rest from `prior_run_id` in `store`
pub async fn execute_subset(
    plan: &ExecutionPlan,
    prior_run_id: &str,
    step_keys: &[&str],
    store: Arc<dyn IntermediateStore>,
) -> EngineResult<RunResult> {
    let config = ExecutorConfig::from_config(&plan.config().execution)?;
    PlanExecutor::new(store)
        .with_config(config)
        .execute_subset(plan, prior_run_id, step_keys, None)
        .await
}
