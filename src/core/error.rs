//! Install failure kinds and per-package stages.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::builder::toolchain::Language;
use crate::util::diagnostic::{suggestions, Diagnostic};

use super::package::{PackageName, Precision};

/// Where a package is in its install state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallStage {
    NotStarted,
    ResolvingDependencies,
    SearchingExisting,
    Fetching,
    Building,
    Installing,
    Verifying,
    Usable,
    Failed,
}

impl InstallStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStage::NotStarted => "not started",
            InstallStage::ResolvingDependencies => "resolving dependencies",
            InstallStage::SearchingExisting => "searching existing installs",
            InstallStage::Fetching => "fetching",
            InstallStage::Building => "building",
            InstallStage::Installing => "installing",
            InstallStage::Verifying => "verifying",
            InstallStage::Usable => "usable",
            InstallStage::Failed => "failed",
        }
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a package could not be made usable.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("`{package}` was not found locally")]
    NotFoundLocally { package: PackageName },

    #[error("failed to fetch sources for `{package}`")]
    FetchFailure {
        package: PackageName,
        /// One message per fetch location tried, in order
        errors: Vec<String>,
    },

    #[error("dependency cycle: {}", format_cycle(.cycle))]
    CycleDependency { cycle: Vec<PackageName> },

    #[error("build of `{package}` failed during {phase} (`{command}`)")]
    BuildBackendFailure {
        package: PackageName,
        phase: String,
        command: String,
        exit_status: Option<i32>,
        log: String,
    },

    #[error("`{command}` for `{package}` timed out after {}s", .limit.as_secs())]
    Timeout {
        package: PackageName,
        command: String,
        limit: Duration,
        log: String,
    },

    #[error("`{package}` built, but none of its library sets was found in the prefix")]
    MissingArtifacts {
        package: PackageName,
        /// (location, hypothesis) pairs that were checked
        attempts: Vec<String>,
    },

    #[error("`{package}` does not export `{symbol}`{}", format_precision(.precision))]
    SymbolVerificationFailure {
        package: PackageName,
        symbol: String,
        precision: Option<Precision>,
    },

    #[error("failed to place `{}` for `{package}`: {message}", .target.display())]
    RelocationFailure {
        package: PackageName,
        target: PathBuf,
        message: String,
        permission_denied: bool,
    },

    #[error("`{package}` overwrote `{}`, which was installed by `{owner}`", .path.display())]
    PrefixConflict {
        package: PackageName,
        owner: PackageName,
        path: PathBuf,
    },

    #[error("`{package}` cannot be installed because its dependency `{dependency}` failed")]
    DependencyFailed {
        package: PackageName,
        dependency: PackageName,
        cause: Arc<InstallError>,
    },

    #[error("`{package}` needs a {language} compiler, but none is available")]
    MissingToolchainComponent {
        package: PackageName,
        language: Language,
    },

    #[error("cannot verify `{package}`: {message}")]
    ProbeUnavailable {
        package: PackageName,
        message: String,
    },

    #[error("unknown package `{name}`")]
    UnknownPackage {
        name: PackageName,
        referenced_by: Option<PackageName>,
    },

    #[error("installation of `{package}` was cancelled")]
    Cancelled { package: PackageName },
}

fn format_cycle(cycle: &[PackageName]) -> String {
    cycle
        .iter()
        .map(PackageName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_precision(precision: &Option<Precision>) -> String {
    match precision {
        Some(p) => format!(" in {} precision", p),
        None => String::new(),
    }
}

impl InstallError {
    /// Short machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            InstallError::NotFoundLocally { .. } => "not-found-locally",
            InstallError::FetchFailure { .. } => "fetch-failure",
            InstallError::CycleDependency { .. } => "cycle-dependency",
            InstallError::BuildBackendFailure { .. } => "build-backend-failure",
            InstallError::Timeout { .. } => "timeout",
            InstallError::MissingArtifacts { .. } => "missing-artifacts",
            InstallError::SymbolVerificationFailure { .. } => "symbol-verification-failure",
            InstallError::RelocationFailure { .. } => "relocation-failure",
            InstallError::PrefixConflict { .. } => "prefix-conflict",
            InstallError::DependencyFailed { .. } => "dependency-failed",
            InstallError::MissingToolchainComponent { .. } => "missing-toolchain-component",
            InstallError::ProbeUnavailable { .. } => "probe-unavailable",
            InstallError::UnknownPackage { .. } => "unknown-package",
            InstallError::Cancelled { .. } => "cancelled",
        }
    }

    /// The failure at the bottom of a dependency chain.
    pub fn root_cause(&self) -> &InstallError {
        match self {
            InstallError::DependencyFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Captured backend output, when the failure carries any.
    pub fn log(&self) -> Option<&str> {
        match self {
            InstallError::BuildBackendFailure { log, .. } | InstallError::Timeout { log, .. } => {
                Some(log)
            }
            InstallError::DependencyFailed { cause, .. } => cause.log(),
            _ => None,
        }
    }

    /// Convert to a user-facing diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::error(self.to_string());

        match self {
            InstallError::NotFoundLocally { .. } => {
                diag.with_suggestion(suggestions::EXISTING_REJECTED)
            }

            InstallError::FetchFailure { errors, .. } => errors
                .iter()
                .fold(diag, |d, e| d.with_context(e.clone()))
                .with_suggestion(suggestions::FETCH_FAILED),

            InstallError::CycleDependency { .. } => diag.with_suggestion(suggestions::CYCLE),

            InstallError::BuildBackendFailure {
                exit_status, log, ..
            } => diag
                .with_context(match exit_status {
                    Some(code) => format!("exit status: {}", code),
                    None => "terminated by a signal".to_string(),
                })
                .with_attachment(log.clone())
                .with_suggestion(suggestions::BUILD_FAILED),

            InstallError::Timeout { log, .. } => diag
                .with_attachment(log.clone())
                .with_suggestion("Raise the limit with --timeout <secs>"),

            InstallError::MissingArtifacts { attempts, .. } => attempts
                .iter()
                .fold(diag, |d, a| d.with_context(format!("tried {}", a)))
                .with_suggestion("Check the recipe's `libraries` and `lib-dirs` against what the build installs"),

            InstallError::SymbolVerificationFailure { .. } => diag
                .with_context("the library files exist but do not provide this entry point")
                .with_suggestion(suggestions::EXISTING_REJECTED),

            InstallError::RelocationFailure {
                permission_denied, ..
            } => {
                if *permission_denied {
                    diag.with_suggestion(suggestions::PRIVILEGED_INSTALL)
                        .with_suggestion(suggestions::WRITABLE_PREFIX)
                } else {
                    diag.with_suggestion(suggestions::WRITABLE_PREFIX)
                }
            }

            InstallError::PrefixConflict { .. } => diag
                .with_context("artifacts in the shared prefix may only be replaced by an explicit relocation")
                .with_suggestion("Declare a `relocate` step for one of the packages"),

            InstallError::DependencyFailed { cause, .. } => {
                let root = cause.root_cause();
                let mut diag = diag.with_context(format!("caused by: {}", root));
                if let Some(log) = root.log() {
                    diag = diag.with_attachment(log.to_string());
                }
                diag
            }

            InstallError::MissingToolchainComponent { language, .. } => diag.with_suggestion(
                format!(
                    "Install a {} compiler or set {} / [toolchain] in .quay/config.toml",
                    language,
                    language.env_var()
                ),
            ),

            InstallError::ProbeUnavailable { .. } => {
                diag.with_suggestion("Install a C compiler so symbol probes can be linked")
            }

            InstallError::UnknownPackage { referenced_by, .. } => {
                let diag = match referenced_by {
                    Some(parent) => diag.with_context(format!("referenced by `{}`", parent)),
                    None => diag,
                };
                diag.with_suggestion("Run `quay plan --list` to see the known packages")
            }

            InstallError::Cancelled { .. } => diag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_failure_surfaces_root_log() {
        let build = InstallError::BuildBackendFailure {
            package: "z".into(),
            phase: "compile".into(),
            command: "make".into(),
            exit_status: Some(2),
            log: "z.c:1: error: expected ';'\n".into(),
        };
        let err = InstallError::DependencyFailed {
            package: "y".into(),
            dependency: "z".into(),
            cause: Arc::new(build),
        };

        assert_eq!(err.root_cause().kind(), "build-backend-failure");

        let output = err.to_diagnostic().format(false);
        assert!(output.contains("dependency `z` failed"));
        assert!(output.contains("caused by: build of `z` failed during compile"));
        assert!(output.contains("    | z.c:1: error: expected ';'"));
    }

    #[test]
    fn test_cycle_message() {
        let err = InstallError::CycleDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_relocation_suggests_privileges() {
        let err = InstallError::RelocationFailure {
            package: "ctetgen".into(),
            target: PathBuf::from("/usr/local/lib/libctetgen.a"),
            message: "Permission denied (os error 13)".into(),
            permission_denied: true,
        };

        let output = err.to_diagnostic().format(false);
        assert!(output.contains("install-sudo"));
        assert!(output.contains("--prefix"));
    }

    #[test]
    fn test_symbol_failure_names_precision() {
        let err = InstallError::SymbolVerificationFailure {
            package: "x".into(),
            symbol: "food_".into(),
            precision: Some(Precision::Double),
        };
        assert_eq!(
            err.to_string(),
            "`x` does not export `food_` in double precision"
        );
    }
}
