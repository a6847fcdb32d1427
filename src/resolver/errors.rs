//! Resolution error types and diagnostics.

use thiserror::Error;

use crate::core::{InstallError, PackageName};
use crate::util::diagnostic::{suggestions, Diagnostic};

/// Error while validating the dependency graph.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cycle detected in dependency graph")]
    CycleDependency { cycle: Vec<PackageName> },

    #[error("package not found: `{name}`")]
    UnknownDependency {
        name: PackageName,
        referenced_by: Option<PackageName>,
    },
}

impl ResolveError {
    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            ResolveError::CycleDependency { cycle } => {
                let names: Vec<&str> = cycle.iter().map(PackageName::as_str).collect();
                Diagnostic::error("cycle detected in dependency graph")
                    .with_context(format!("cycle: {}", names.join(" -> ")))
                    .with_suggestion(suggestions::CYCLE)
            }

            ResolveError::UnknownDependency {
                name,
                referenced_by,
            } => {
                let mut diag = Diagnostic::error(format!("could not find package `{}`", name));

                if let Some(parent) = referenced_by {
                    diag = diag.with_context(format!("required by `{}`", parent));
                }

                diag.with_suggestion("Check that the package name is spelled correctly")
                    .with_suggestion("Run `quay plan --list` to see the known packages")
            }
        }
    }
}

impl From<ResolveError> for InstallError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::CycleDependency { cycle } => InstallError::CycleDependency { cycle },
            ResolveError::UnknownDependency {
                name,
                referenced_by,
            } => InstallError::UnknownPackage {
                name,
                referenced_by,
            },
        }
    }
}
