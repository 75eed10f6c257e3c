mod commands;
mod demos;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

/// Build and run execution plans over the built-in demo graphs
#[derive(Parser, Debug)]
#[command(name = "planrun", version, about)]
struct Cli {
    /// Show engine debug logs (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the graphs in the demo repository
    List(commands::list::ListArgs),
    /// Print the execution plan of a graph
    Plan(commands::plan::PlanArgs),
    /// Execute a graph
    Run(commands::run::RunArgs),
    /// Re-execute selected steps of a prior run
    Reexecute(commands::reexecute::ReexecuteArgs),
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let repository = demos::repository()?;

    match cli.command {
        Commands::List(args) => commands::list::execute(&repository, args),
        Commands::Plan(args) => commands::plan::execute(&repository, args),
        Commands::Run(args) => commands::run::execute(&repository, args).await,
        Commands::Reexecute(args) => commands::reexecute::execute(&repository, args).await,
    }
}
