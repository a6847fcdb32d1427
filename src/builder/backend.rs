//! Backend declarations carried by recipes.
//!
//! A recipe's `[backend]` table is a closed set of tagged variants. Each
//! variant holds only the data its adapter needs to produce a [`BuildPlan`].
//!
//! [`BuildPlan`]: super::plan::BuildPlan

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::PackageName;
use crate::discovery::SearchLocation;
use crate::resolver::DependencyResult;

use super::autotools::AutotoolsSpec;
use super::cmake::CMakeSpec;
use super::custom::CustomSpec;

/// Build backend of a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendSpec {
    Cmake(CMakeSpec),
    Autotools(AutotoolsSpec),
    Custom(CustomSpec),
}

impl BackendSpec {
    /// Backend kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendSpec::Cmake(_) => "cmake",
            BackendSpec::Autotools(_) => "autotools",
            BackendSpec::Custom(_) => "custom",
        }
    }

    /// Variables injected from resolved dependencies.
    pub fn dependency_variables(&self) -> &[DependencyVariable] {
        match self {
            BackendSpec::Cmake(spec) => &spec.dependency_variables,
            BackendSpec::Autotools(spec) => &spec.dependency_variables,
            BackendSpec::Custom(_) => &[],
        }
    }
}

impl Default for BackendSpec {
    fn default() -> Self {
        BackendSpec::Custom(CustomSpec::default())
    }
}

/// Which part of a resolved dependency a variable receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariableValue {
    /// Libraries in link order, space separated
    #[default]
    Libraries,
    /// Include directories, space separated
    IncludeDirs,
    /// Install root the libraries were found under
    Prefix,
}

/// A backend variable whose value comes from a resolved dependency,
/// e.g. `LAPACK_LIBRARIES` from `blaslapack`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DependencyVariable {
    pub variable: String,
    pub dependency: PackageName,
    #[serde(default)]
    pub value: VariableValue,
}

impl DependencyVariable {
    /// Render the value from the resolved dependencies.
    ///
    /// Returns `None` when the dependency is not among `deps` or is not usable.
    pub fn render(&self, deps: &[DependencyResult]) -> Option<String> {
        let dep = deps.iter().find(|d| d.name == self.dependency)?;
        let install = dep.entry.install()?;

        let value = match self.value {
            VariableValue::Libraries => join_paths(&install.link_libraries()),
            VariableValue::IncludeDirs => join_paths(&install.include_dirs),
            VariableValue::Prefix => match install.libraries.location {
                SearchLocation::Directory { ref root, .. } => root.display().to_string(),
                SearchLocation::Default => install
                    .libraries
                    .libraries
                    .first()
                    .and_then(|lib| lib.parent())
                    .and_then(Path::parent)
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            },
        };
        Some(value)
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render every variable as `NAME=value` pairs, in declared order.
pub fn render_variables(vars: &[DependencyVariable], deps: &[DependencyResult]) -> Vec<(String, String)> {
    vars.iter()
        .filter_map(|var| match var.render(deps) {
            Some(value) => Some((var.variable.clone(), value)),
            None => {
                tracing::warn!(
                    "`{}` is not resolved; `{}` will not be passed",
                    var.dependency,
                    var.variable
                );
                None
            }
        })
        .collect()
}
