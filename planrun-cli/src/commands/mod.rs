pub mod list;
pub mod plan;
pub mod reexecute;
pub mod run;

use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;

use plan_engine::execution::{progress_stream, ProgressReceiver};
use tokio_stream::StreamExt;
use plan_engine::{
    build_plan, build_plan_for_preset, ExecutionEvent, ExecutionPlan, Repository, ResolvedConfig,
    RunResult, StepState, StorageConfig,
};

/// Graph selection shared by every command that builds a plan
#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Name of the graph in the demo repository
    pub graph: String,

    /// Run configuration file (YAML, or JSON by extension)
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Mode to build the plan for (default: the graph's first mode)
    #[arg(long, value_name = "MODE", conflicts_with = "preset")]
    pub mode: Option<String>,

    /// Use a preset's mode and configuration
    #[arg(long, value_name = "PRESET")]
    pub preset: Option<String>,

    /// Keep intermediates on disk under this directory
    #[arg(long, value_name = "DIR")]
    pub storage_dir: Option<PathBuf>,
}

impl GraphArgs {
    pub fn load_plan(&self, repository: &Repository) -> Result<ExecutionPlan> {
        let graph = repository.graph(&self.graph)?;

        if let Some(preset) = &self.preset {
            if self.config.is_some() || self.storage_dir.is_some() {
                bail!("--preset carries its own configuration; drop --config and --storage-dir");
            }
            return Ok(build_plan_for_preset(graph, preset)?);
        }

        let mut config = match &self.config {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                ResolvedConfig::from_file(path)?
            }
            None => ResolvedConfig::default(),
        };
        if let Some(dir) = &self.storage_dir {
            config.storage = StorageConfig::filesystem(dir);
        }

        build_plan(graph, &config, self.mode.as_deref())
            .map_err(|e| eyre!("Failed to build plan for '{}': {}", self.graph, e))
    }
}

/// Print progress events until the run completes
pub async fn follow_progress(rx: ProgressReceiver) {
    let mut events = progress_stream(rx);
    while let Some(event) = events.next().await {
        match &event {
            ExecutionEvent::RunStarted {
                run_id,
                graph_name,
                mode,
                total_steps,
                ..
            } => {
                println!();
                output::header(&format!(
                    "Run {} of '{}' in mode '{}' ({} steps)",
                    run_id, graph_name, mode, total_steps
                ));
            }
            ExecutionEvent::IntermediateCopied {
                prior_run_id,
                handle,
                ..
            } => {
                output::dim(&format!("  copied {} from run {}", handle, prior_run_id));
            }
            ExecutionEvent::StepStarted { step_key, kind, .. } => {
                output::status("Running", &format!("{} ({})", step_key, kind));
            }
            ExecutionEvent::StepOutput {
                output_name, value, ..
            } => {
                output::step_detail(&format!("{} = {}", output_name, value.preview(60)));
            }
            ExecutionEvent::ExpectationEvaluated {
                name,
                success,
                message,
                ..
            } => {
                let verdict = if *success { "passed" } else { "failed" };
                let line = match message {
                    Some(message) => format!("expectation '{}' {}: {}", name, verdict, message),
                    None => format!("expectation '{}' {}", name, verdict),
                };
                if *success {
                    output::step_detail(&line);
                } else {
                    output::step_error(&line);
                }
            }
            ExecutionEvent::Materialized { path, .. } => {
                output::step_detail(&format!("materialized {}", path));
            }
            ExecutionEvent::StepSucceeded {
                step_key, duration, ..
            } => {
                output::success(&format!("{} ({:.2}s)", step_key, duration.as_secs_f64()));
            }
            ExecutionEvent::StepFailed { step_key, error, .. } => {
                output::failure(&format!("{} [{}]", step_key, error.kind));
                output::step_error(&error.message);
                if let Some(cause) = &error.cause {
                    if cause != &error.message {
                        output::step_error(cause);
                    }
                }
            }
            ExecutionEvent::StepSkipped {
                step_key, reason, ..
            } => {
                output::warning(&format!("{} skipped: {}", step_key, reason));
            }
            ExecutionEvent::Log(record) => {
                output::dim(&format!("  [{}] {}", record.level, record.message));
            }
            ExecutionEvent::RunCompleted { .. } => break,
        }
    }
}

/// Print the per-step table and overall verdict; an error when the run failed
pub fn report(result: &RunResult) -> Result<()> {
    println!();
    for record in &result.steps {
        let duration = record
            .duration
            .map(|d| format!("{:.2}s", d.as_secs_f64()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<6} {:<48} {}",
            output::state_label(record.state),
            record.step_key,
            duration
        );
    }
    println!();

    if result.canceled {
        bail!("Run {} was canceled", result.run_id);
    }
    if result.success {
        output::success(&format!(
            "Run {} succeeded in {:.2}s",
            result.run_id,
            result.duration.as_secs_f64()
        ));
        Ok(())
    } else {
        let failed: Vec<&str> = result
            .steps
            .iter()
            .filter(|s| s.state == StepState::Failure)
            .map(|s| s.step_key.as_str())
            .collect();
        output::failure(&format!(
            "Run {} failed after {:.2}s",
            result.run_id,
            result.duration.as_secs_f64()
        ));
        bail!("{} step(s) failed: {}", failed.len(), failed.join(", "))
    }
}
