//! quay CLI - locate or build the external native libraries a project needs

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands, GlobalArgs};
use commands::AlreadyReported;

fn main() {
    if let Err(e) = run() {
        if e.downcast_ref::<AlreadyReported>().is_none() {
            eprintln!("error: {:#}", e);
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Parse CLI
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("quay=debug")
    } else {
        EnvFilter::new("quay=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let global = GlobalArgs {
        verbose: cli.verbose,
        quiet: cli.quiet,
        no_color: cli.no_color,
        json: cli.is_json(),
        config: cli.config.clone(),
        recipes: cli.recipes.clone(),
    };

    // Execute command
    match cli.command {
        Commands::Install(args) => commands::install::execute(args, &global),
        Commands::Locate(args) => commands::locate::execute(args, &global),
        Commands::Plan(args) => commands::plan::execute(args, &global),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
