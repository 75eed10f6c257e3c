use crate::commands::{follow_progress, report, GraphArgs};
use crate::output;

use clap::Args;
use color_eyre::Result;

use plan_engine::execution::progress_channel;
use plan_engine::{ObjectStoreRegistry, PlanExecutor, Repository};

/// Execute every step of a graph's plan
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub graph: GraphArgs,

    /// Run id to use (default: configured or generated)
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Keep running independent branches after a step fails
    #[arg(long)]
    pub continue_on_error: bool,
}

pub async fn execute(repository: &Repository, args: RunArgs) -> Result<()> {
    let plan = args.graph.load_plan(repository)?;
    output::info(&format!(
        "Graph '{}': {} steps, storage {}",
        plan.graph_name(),
        plan.len(),
        plan.config().storage.label()
    ));

    let mut executor = PlanExecutor::for_plan(&plan, &ObjectStoreRegistry::new())?;
    if args.continue_on_error {
        let config = executor.config().clone().with_continue_on_error(true);
        executor = executor.with_config(config);
    }

    let (tx, rx) = progress_channel();
    let executor = executor.with_progress(tx);
    let run_id = args.run_id;
    tracing::debug!(
        graph = %plan.graph_name(),
        mode = %plan.mode().name,
        continue_on_error = args.continue_on_error,
        "starting run"
    );

    // Spawn execution in background, print progress in the foreground
    let handle = tokio::spawn(async move { executor.execute(&plan, run_id).await });
    follow_progress(rx).await;

    let result = handle.await??;
    report(&result)
}
