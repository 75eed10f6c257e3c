use crate::output;

use clap::Args;
use color_eyre::Result;

use plan_engine::Repository;

/// List graphs with their modes and presets
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Also show each graph's nodes
    #[arg(long)]
    pub nodes: bool,
}

pub fn execute(repository: &Repository, args: ListArgs) -> Result<()> {
    output::header(&format!(
        "Repository '{}' ({} graphs)",
        repository.name,
        repository.len()
    ));

    for graph in repository.graphs() {
        let modes: Vec<&str> = graph.modes().iter().map(|m| m.name.as_str()).collect();
        let presets: Vec<&str> = graph.presets().iter().map(|p| p.name.as_str()).collect();

        println!();
        println!("  {}", graph.name);
        if let Some(description) = &graph.description {
            output::dim(&format!("    {}", description));
        }
        println!("    modes:   {}", modes.join(", "));
        if !presets.is_empty() {
            println!("    presets: {}", presets.join(", "));
        }
        if args.nodes {
            for node in graph.topological_order() {
                println!("    - {}", node.name);
            }
        }
    }

    Ok(())
}
