//! Command implementations

pub mod completions;
pub mod install;
pub mod locate;
pub mod plan;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::ProgressBar;

use quay::core::{InstallError, InstallStage, Origin, PackageName, RecipeBook};
use quay::discovery::LibraryHypothesisMatcher;
use quay::ops::{CancelToken, EventSink, InstallEvent, InstallOptions, InstallReport};
use quay::probe::PrecisionPolicy;
use quay::util::config::{global_config_path, load_config, project_config_path, Config};
use quay::util::diagnostic::emit;
use quay::util::{Shell, Status};

use crate::cli::{GlobalArgs, SearchArgs};

/// Marker error: the failure has already been shown to the user.
#[derive(Debug)]
pub struct AlreadyReported;

impl fmt::Display for AlreadyReported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("already reported")
    }
}

impl std::error::Error for AlreadyReported {}

/// What every package command needs: configuration, recipes and a shell.
pub struct CommandContext {
    pub cwd: PathBuf,
    pub config: Config,
    pub book: RecipeBook,
    pub shell: Arc<Shell>,
}

impl CommandContext {
    pub fn new(global: &GlobalArgs) -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;

        let global_path = match global.config {
            Some(ref path) => {
                anyhow::ensure!(path.exists(), "config file `{}` does not exist", path.display());
                Some(path.clone())
            }
            None => global_config_path(),
        };
        let config = load_config(global_path.as_deref(), &project_config_path(&cwd));

        let book = match global.recipes {
            Some(ref path) => RecipeBook::load(path),
            None => RecipeBook::builtin(),
        }
        .map_err(|e| anyhow::anyhow!("{:?}", miette::Report::new(e)))?;
        tracing::debug!("{} recipe(s) loaded", book.len());

        let shell = Shell::from_flags(global.quiet, global.verbose, global.no_color, global.json);

        Ok(CommandContext {
            cwd,
            config,
            book,
            shell: Arc::new(shell),
        })
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    /// Install prefix: flag, then config, then `.quay/prefix`.
    pub fn prefix(&self, flag: Option<&Path>) -> PathBuf {
        let path = flag
            .map(Path::to_path_buf)
            .or_else(|| self.config.install.prefix.clone())
            .unwrap_or_else(|| PathBuf::from(".quay").join("prefix"));
        self.resolve_path(&path)
    }

    /// Work directory: flag, then config, then `.quay/work`.
    pub fn work_dir(&self, flag: Option<&Path>) -> PathBuf {
        let path = flag
            .map(Path::to_path_buf)
            .or_else(|| self.config.install.work_dir.clone())
            .unwrap_or_else(|| PathBuf::from(".quay").join("work"));
        self.resolve_path(&path)
    }

    /// Install options from config, with the search flags applied on top.
    pub fn install_options(&self, work_dir: PathBuf, search: &SearchArgs) -> InstallOptions {
        let mut options = InstallOptions::from_config(&self.config, work_dir);
        for (name, dir) in &search.with_dir {
            options = options.with_override(name.clone(), self.resolve_path(dir));
        }
        if search.accept_partial_precision {
            options = options.with_policy(PrecisionPolicy::AcceptPartial);
        }
        options
    }

    pub fn matcher(&self) -> LibraryHypothesisMatcher {
        LibraryHypothesisMatcher::from_environment(&self.config.search.system_lib_dirs)
    }

    /// Event sink: JSON lines in JSON mode, status lines otherwise.
    ///
    /// Status lines are printed around `progress`, which shows the latest
    /// stage change. Only the printing runs inside `suspend`, which holds
    /// the bar's lock.
    pub fn events(&self, progress: ProgressBar) -> EventSink {
        let shell = self.shell.clone();
        Arc::new(move |event: &InstallEvent| {
            if shell.is_json() {
                println!("{}", event.to_json());
                return;
            }
            let status = match event {
                InstallEvent::StageChanged { package, stage } => {
                    progress.set_message(format!("{}: {}", package, stage));
                    stage_status(*stage).map(|status| (status, package))
                }
                InstallEvent::PackageFinished {
                    package,
                    origin: Some(Origin::Existing),
                    ..
                } => Some((Status::Found, package)),
                InstallEvent::PackageFinished {
                    package,
                    usable: true,
                    ..
                } => Some((Status::Finished, package)),
                InstallEvent::PackageFinished { package, .. } => Some((Status::Failed, package)),
                InstallEvent::SessionFinished { .. } => {
                    progress.finish_and_clear();
                    None
                }
            };
            if let Some((status, package)) = status {
                progress.suspend(|| shell.status(status, package));
            }
        })
    }

    /// Turn the first Ctrl-C into a cancellation of `token`.
    ///
    /// Backend processes run in their own process groups and never see the
    /// signal; they finish or hit their timeout while no new work starts. A
    /// second Ctrl-C exits at once.
    pub fn cancel_on_interrupt(&self, token: CancelToken) {
        let shell = self.shell.clone();
        let interrupts = AtomicUsize::new(0);
        let installed = ctrlc::set_handler(move || {
            if interrupts.fetch_add(1, Ordering::SeqCst) == 0 {
                shell.warn("interrupted: letting running commands finish, press Ctrl-C again to exit now");
                token.cancel();
            } else {
                std::process::exit(130);
            }
        });
        if let Err(e) = installed {
            tracing::warn!("cannot install Ctrl-C handler: {}", e);
        }
    }

    /// Show a run-level failure and turn it into an exit.
    pub fn fail(&self, err: InstallError) -> anyhow::Error {
        if self.shell.is_json() {
            self.shell.json(&serde_json::json!({
                "reason": "error",
                "kind": err.kind(),
                "message": err.to_string(),
            }));
        } else {
            emit(&err.to_diagnostic(), self.shell.use_color());
        }
        AlreadyReported.into()
    }

    /// Print the report, failing when any package is not usable.
    pub fn finish(&self, report: &InstallReport) -> Result<()> {
        if self.shell.is_json() {
            let mut value = report.to_json();
            if let Some(map) = value.as_object_mut() {
                map.insert("reason".into(), "install-report".into());
                map.insert("success".into(), report.success().into());
            }
            self.shell.json(&value);
        } else {
            for failure in report.failures() {
                if let Some(diag) = failure.diagnostic() {
                    emit(&diag, self.shell.use_color());
                }
            }
            if !report.packages.is_empty() {
                print!("{}", report.render_table());
            }
        }

        let failed = report.failures().count();
        if failed > 0 {
            if !self.shell.is_json() {
                self.shell.status(
                    Status::Failed,
                    format!("{} of {} package(s) are not usable", failed, report.packages.len()),
                );
            }
            return Err(AlreadyReported.into());
        }
        Ok(())
    }
}

fn stage_status(stage: InstallStage) -> Option<Status> {
    match stage {
        InstallStage::SearchingExisting => Some(Status::Searching),
        InstallStage::Fetching => Some(Status::Fetching),
        InstallStage::Building => Some(Status::Building),
        _ => None,
    }
}

/// Package names from the command line.
pub fn package_names(names: &[String]) -> Vec<PackageName> {
    names.iter().map(|n| PackageName::new(n.as_str())).collect()
}
