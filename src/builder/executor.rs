//! Build plan execution.
//!
//! Runs each step of a [`BuildPlan`] in order through a [`CommandRunner`],
//! capturing every command's output into one log. Steps that mutate the
//! shared prefix run under the prefix's install lock; the prefix is
//! snapshotted when the lock is taken and every file that changed by the end
//! of the plan is attributed to the package.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::core::{InstallError, InstallPrefix, PackageName};
use crate::util::fs::{append_string, ensure_dir};
use crate::util::process::{CommandRunner, ProcessBuilder, ProcessOutput};

use super::plan::{BuildPlan, BuildStep, Phase};

static VERSION_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"version\s+(\d+)\.(\d+)(?:\.(\d+))?").ok());

/// Uniform result of running a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Success {
        /// Libraries the build placed in the prefix
        installed_libraries: Vec<PathBuf>,
        /// Captured output of every command
        log: String,
    },
    Failure {
        phase: Phase,
        /// The failing command line
        command: String,
        log: String,
        exit_status: Option<i32>,
        timed_out: bool,
    },
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Success { .. })
    }

    pub fn log(&self) -> &str {
        match self {
            BuildOutcome::Success { log, .. } | BuildOutcome::Failure { log, .. } => log,
        }
    }

    /// The installed libraries, or the install error matching the failure.
    pub fn into_result(
        self,
        package: &PackageName,
        timeout: std::time::Duration,
    ) -> Result<Vec<PathBuf>, InstallError> {
        match self {
            BuildOutcome::Success {
                installed_libraries,
                ..
            } => Ok(installed_libraries),
            BuildOutcome::Failure {
                command,
                log,
                timed_out: true,
                ..
            } => Err(InstallError::Timeout {
                package: package.clone(),
                command,
                limit: timeout,
                log,
            }),
            BuildOutcome::Failure {
                phase,
                command,
                log,
                exit_status,
                ..
            } => Err(InstallError::BuildBackendFailure {
                package: package.clone(),
                phase: phase.to_string(),
                command,
                exit_status,
                log,
            }),
        }
    }
}

/// Executes build plans.
pub struct PlanExecutor<'a> {
    runner: Arc<dyn CommandRunner>,
    prefix: &'a InstallPrefix,
    log_file: Option<PathBuf>,
    on_phase: Option<&'a dyn Fn(Phase)>,
}

impl<'a> PlanExecutor<'a> {
    pub fn new(runner: Arc<dyn CommandRunner>, prefix: &'a InstallPrefix) -> Self {
        PlanExecutor {
            runner,
            prefix,
            log_file: None,
            on_phase: None,
        }
    }

    /// Also append captured output to `path`.
    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    /// Call `hook` each time execution enters a new phase.
    pub fn on_phase(mut self, hook: &'a dyn Fn(Phase)) -> Self {
        self.on_phase = Some(hook);
        self
    }

    /// Run every step of `plan`.
    ///
    /// Command failures come back as [`BuildOutcome::Failure`]; prefix
    /// mutations that fail or collide with another package's files are
    /// returned as errors.
    pub fn execute(&self, plan: &BuildPlan) -> Result<BuildOutcome, InstallError> {
        let package = &plan.package;
        let mut log = String::new();
        let mut install = None;
        let mut current_phase = None;

        if let Some(ref path) = self.log_file {
            if let Some(parent) = path.parent() {
                if let Err(e) = ensure_dir(parent) {
                    tracing::warn!("cannot create log directory: {:#}", e);
                }
            }
        }

        for step in &plan.steps {
            if current_phase != Some(step.phase()) {
                current_phase = Some(step.phase());
                if let Some(hook) = self.on_phase {
                    hook(step.phase());
                }
            }

            if install.is_none() && step.touches_prefix() {
                let guard = self.prefix.lock_install();
                install = Some((guard, self.prefix.snapshot()));
            }

            match step {
                BuildStep::RequireTool {
                    tool,
                    program,
                    min_version,
                } => {
                    let program = program.clone().unwrap_or_else(|| PathBuf::from(tool));
                    let cmd = ProcessBuilder::new(&program)
                        .arg("--version")
                        .timeout(plan.timeout);
                    let output = match self.run(&cmd, &mut log) {
                        Ok(output) if output.success() => output,
                        Ok(output) => return Ok(failure(Phase::Check, &cmd, log, &output)),
                        Err(_) => return Ok(spawn_failure(Phase::Check, &cmd, log)),
                    };

                    if let Some(required) = min_version {
                        match parse_tool_version(&output.stdout) {
                            Some(found) if found >= *required => {
                                tracing::debug!("{} {} satisfies >= {}", tool, found, required);
                            }
                            found => {
                                let found = found
                                    .map(|v| v.to_string())
                                    .unwrap_or_else(|| "unknown".to_string());
                                self.record(
                                    &mut log,
                                    &format!("{} {} is older than the required {}\n", tool, found, required),
                                );
                                return Ok(BuildOutcome::Failure {
                                    phase: Phase::Check,
                                    command: cmd.display_command(),
                                    log,
                                    exit_status: output.code,
                                    timed_out: false,
                                });
                            }
                        }
                    }
                }

                BuildStep::Run { phase, command } => {
                    tracing::info!("{} `{}`: {}", phase, package, command);
                    let cmd = command.to_process(plan.timeout);
                    match self.run(&cmd, &mut log) {
                        Ok(output) if output.success() => {}
                        Ok(output) => return Ok(failure(*phase, &cmd, log, &output)),
                        Err(_) => return Ok(spawn_failure(*phase, &cmd, log)),
                    }
                }

                BuildStep::MakeDirs { dirs } => self.prefix.make_dirs(package, dirs)?,

                BuildStep::CopyFiles { files } => {
                    for (from, to) in files {
                        self.prefix.copy_into(package, from, to)?;
                        self.record(&mut log, &format!("copied {} -> {}\n", from.display(), to.display()));
                    }
                }

                BuildStep::RemoveStale { path } => self.prefix.remove_stale(package, path)?,

                BuildStep::Relocate { from, to } => {
                    self.prefix.relocate(package, from, to)?;
                    self.record(&mut log, &format!("relocated {} -> {}\n", from.display(), to.display()));
                }
            }
        }

        let installed_libraries = match install {
            Some((_guard, before)) => {
                let after = self.prefix.snapshot();
                self.prefix
                    .attribute_changes(package, &before, &after)?
                    .into_iter()
                    .filter(|p| is_library(p))
                    .collect()
            }
            None => Vec::new(),
        };

        Ok(BuildOutcome::Success {
            installed_libraries,
            log,
        })
    }

    fn run(&self, cmd: &ProcessBuilder, log: &mut String) -> anyhow::Result<ProcessOutput> {
        self.record(log, &format!("$ {}\n", cmd.display_command()));
        match self.runner.run(cmd) {
            Ok(output) => {
                self.record(log, &output.combined());
                Ok(output)
            }
            Err(e) => {
                self.record(log, &format!("{:#}\n", e));
                Err(e)
            }
        }
    }

    fn record(&self, log: &mut String, text: &str) {
        log.push_str(text);
        if let Some(ref path) = self.log_file {
            if let Err(e) = append_string(path, text) {
                tracing::warn!("cannot write build log {}: {:#}", path.display(), e);
            }
        }
    }
}

fn failure(phase: Phase, cmd: &ProcessBuilder, log: String, output: &ProcessOutput) -> BuildOutcome {
    BuildOutcome::Failure {
        phase,
        command: cmd.display_command(),
        log,
        exit_status: output.code,
        timed_out: output.timed_out,
    }
}

fn spawn_failure(phase: Phase, cmd: &ProcessBuilder, log: String) -> BuildOutcome {
    BuildOutcome::Failure {
        phase,
        command: cmd.display_command(),
        log,
        exit_status: None,
        timed_out: false,
    }
}

/// Parse `<tool> version X.Y[.Z]` output.
pub fn parse_tool_version(output: &str) -> Option<semver::Version> {
    let caps = VERSION_RE.as_ref()?.captures(output)?;
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
    Some(semver::Version::new(part(1)?, part(2)?, part(3).unwrap_or(0)))
}

fn is_library(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".a")
        || name.ends_with(".so")
        || name.contains(".so.")
        || name.ends_with(".dylib")
        || name.ends_with(".lib")
}
