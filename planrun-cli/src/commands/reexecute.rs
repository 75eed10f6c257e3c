use crate::commands::{follow_progress, report, GraphArgs};
use crate::output;

use clap::Args;
use color_eyre::eyre::bail;
use color_eyre::Result;

use plan_engine::execution::progress_channel;
use plan_engine::{ObjectStoreRegistry, PlanExecutor, Repository};

/// Re-execute selected steps, reading every other intermediate from a prior run
#[derive(Args, Debug)]
pub struct ReexecuteArgs {
    #[command(flatten)]
    pub graph: GraphArgs,

    /// Run whose intermediates feed the selected steps
    #[arg(long, value_name = "ID")]
    pub prior_run: String,

    /// Step key to re-execute (repeatable)
    #[arg(long = "step", value_name = "KEY", required = true)]
    pub steps: Vec<String>,

    /// Run id for the new run (default: generated)
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,
}

pub async fn execute(repository: &Repository, args: ReexecuteArgs) -> Result<()> {
    let plan = args.graph.load_plan(repository)?;
    if !plan.config().storage.is_durable() {
        bail!(
            "Re-execution reads a prior run's intermediates; \
             use --storage-dir or configure durable storage"
        );
    }

    output::info(&format!(
        "Re-executing {} of '{}' from run {}",
        args.steps.join(", "),
        plan.graph_name(),
        args.prior_run
    ));

    let (tx, rx) = progress_channel();
    let executor = PlanExecutor::for_plan(&plan, &ObjectStoreRegistry::new())?.with_progress(tx);
    let ReexecuteArgs {
        prior_run,
        steps,
        run_id,
        ..
    } = args;

    tracing::debug!(prior_run = %prior_run, steps = ?steps, "starting re-execution");
    let handle = tokio::spawn(async move {
        let keys: Vec<&str> = steps.iter().map(String::as_str).collect();
        executor.execute_subset(&plan, &prior_run, &keys, run_id).await
    });
    follow_progress(rx).await;

    let result = handle.await??;
    report(&result)
}
