use crate::commands::GraphArgs;
use crate::output;

use clap::Args;
use color_eyre::Result;

use plan_engine::Repository;

/// Build a plan and print its steps in execution order
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub graph: GraphArgs,

    /// Show each step's input wiring and outputs
    #[arg(long, short = 'd')]
    pub details: bool,
}

pub fn execute(repository: &Repository, args: PlanArgs) -> Result<()> {
    output::status("Planning", &args.graph.graph);
    let plan = args.graph.load_plan(repository)?;

    output::header(&format!(
        "Plan for '{}' in mode '{}' ({} steps)",
        plan.graph_name(),
        plan.mode().name,
        plan.len()
    ));

    for (position, step) in plan.steps().iter().enumerate() {
        output::plan_row(position, step.kind, &step.key);
        if !args.details {
            continue;
        }
        for input in &step.inputs {
            output::step_detail(&format!(
                "in  {}: {} <- {}",
                input.name, input.runtime_type, input.upstream
            ));
        }
        for out in &step.outputs {
            let optional = if out.optional { " (optional)" } else { "" };
            output::step_detail(&format!("out {}: {}{}", out.name, out.runtime_type, optional));
        }
        if !step.required_resources.is_empty() {
            let resources: Vec<&str> = step.required_resources.iter().map(String::as_str).collect();
            output::step_detail(&format!("resources {}", resources.join(", ")));
        }
    }

    output::info(&format!(
        "storage: {}, expectations: {}",
        plan.config().storage.label(),
        if plan.config().expectations.evaluate { "on" } else { "off" }
    ));
    Ok(())
}
