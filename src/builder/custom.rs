//! Custom command backend.
//!
//! A declared command sequence with an explicit timeout. Commands run in the
//! source tree (or a subdirectory of it) with the install layout exported
//! through `QUAY_*` environment variables. Any non-zero exit fails the build.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::plan::{BuildStep, CommandLine, Phase, PlanContext};

/// One declared command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CustomCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory, relative to the source tree
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Custom recipe parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CustomSpec {
    #[serde(default)]
    pub commands: Vec<CustomCommand>,
    /// Per-command timeout; the configured default applies when unset
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CustomSpec {
    /// Timeout for this package's commands.
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_secs.map(Duration::from_secs).unwrap_or(default)
    }
}

/// Plan the declared commands.
pub fn plan(spec: &CustomSpec, ctx: &PlanContext<'_>) -> Vec<BuildStep> {
    spec.commands
        .iter()
        .map(|cmd| {
            let cwd = match cmd.cwd {
                Some(ref dir) => ctx.source_dir.join(dir),
                None => ctx.source_dir.clone(),
            };

            let mut command = CommandLine::new(&cmd.program)
                .args(cmd.args.iter().cloned())
                .cwd(cwd)
                .env("QUAY_PREFIX", ctx.prefix.display().to_string())
                .env("QUAY_SOURCE_DIR", ctx.source_dir.display().to_string())
                .env("QUAY_BUILD_DIR", ctx.build_dir.display().to_string())
                .env("QUAY_JOBS", ctx.jobs.to_string());
            for (key, value) in &cmd.env {
                command = command.env(key.clone(), value.clone());
            }

            BuildStep::Run {
                phase: Phase::Install,
                command,
            }
        })
        .collect()
}
