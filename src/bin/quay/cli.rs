//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// quay - locate or build the external native libraries a project needs
#[derive(Parser)]
#[command(name = "quay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print failures
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Output format for results
    #[arg(long, global = true, value_enum, default_value_t = MessageFormat::Human)]
    pub message_format: MessageFormat,

    /// Read configuration from this file instead of ~/.quay/config.toml
    #[arg(long, global = true, env = "QUAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use this recipe book instead of the bundled one
    #[arg(long, global = true, env = "QUAY_RECIPES")]
    pub recipes: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    Human,
    Json,
}

impl Cli {
    pub fn is_json(&self) -> bool {
        self.message_format == MessageFormat::Json
    }
}

/// Options shared by every command that touches packages.
pub struct GlobalArgs {
    pub verbose: bool,
    pub quiet: bool,
    pub no_color: bool,
    pub json: bool,
    pub config: Option<PathBuf>,
    pub recipes: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Make packages usable: reuse existing installs or build them
    Install(InstallArgs),

    /// Search for existing installs without fetching or building
    Locate(LocateArgs),

    /// Show what an install would do, without doing it
    Plan(PlanArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct SearchArgs {
    /// Use an existing install of a package: NAME=DIR (repeatable)
    #[arg(long = "with-dir", value_name = "NAME=DIR", value_parser = parse_override)]
    pub with_dir: Vec<(String, PathBuf)>,

    /// Accept installs that verify for only some declared precisions
    #[arg(long)]
    pub accept_partial_precision: bool,
}

#[derive(Args)]
pub struct InstallArgs {
    /// Packages to install
    #[arg(required = true)]
    pub packages: Vec<String>,

    #[command(flatten)]
    pub search: SearchArgs,

    /// Install prefix (default: .quay/prefix)
    #[arg(long)]
    pub prefix: Option<PathBuf>,

    /// Working directory for sources, build trees and logs (default: .quay/work)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Number of parallel jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Timeout for each backend command, in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Program that elevates writes to the prefix (e.g. sudo)
    #[arg(long)]
    pub install_sudo: Option<String>,

    /// Only use local fetch locations
    #[arg(long)]
    pub offline: bool,
}

#[derive(Args)]
pub struct LocateArgs {
    /// Packages to locate
    #[arg(required = true)]
    pub packages: Vec<String>,

    #[command(flatten)]
    pub search: SearchArgs,

    /// Install prefix searched after the other locations (default: .quay/prefix)
    #[arg(long)]
    pub prefix: Option<PathBuf>,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Packages to plan (default: every known package)
    pub packages: Vec<String>,

    /// List known packages instead of planning
    #[arg(long)]
    pub list: bool,

    /// Install prefix the plan targets (default: .quay/prefix)
    #[arg(long)]
    pub prefix: Option<PathBuf>,

    /// Number of parallel jobs handed to backends
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

fn parse_override(s: &str) -> Result<(String, PathBuf), String> {
    let (name, dir) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=DIR, got `{}`", s))?;
    if name.is_empty() || dir.is_empty() {
        return Err(format!("expected NAME=DIR, got `{}`", s));
    }
    Ok((name.to_string(), PathBuf::from(dir)))
}
