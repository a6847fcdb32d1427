//! Dependency resolution.
//!
//! Dependencies are resolved recursively, depth first, in declared order:
//! each one is made usable (found or built) before the next is looked at and
//! before the depending package's own work begins. A later dependency may
//! therefore see the choices made for an earlier one through the registry.
//!
//! [`DependencyGraph`] offers the whole-graph view used to validate a run up
//! front; [`DependencyResolver`] is the per-package walk.

pub mod errors;
pub mod graph;

pub use errors::ResolveError;
pub use graph::DependencyGraph;

use std::sync::Arc;

use crate::builder::toolchain::Toolchain;
use crate::core::{EntryStatus, InstallError, Package, PackageName, RecipeBook, RegistryEntry};

/// Packages currently being resolved on this call path, outermost first.
#[derive(Debug, Clone, Default)]
pub struct ResolutionStack {
    names: Vec<PackageName>,
}

impl ResolutionStack {
    pub fn new() -> Self {
        ResolutionStack::default()
    }

    pub fn push(&mut self, name: PackageName) {
        self.names.push(name);
    }

    pub fn pop(&mut self) -> Option<PackageName> {
        self.names.pop()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.as_str() == name)
    }

    /// The closed cycle formed by revisiting `name`.
    pub fn cycle_to(&self, name: &PackageName) -> Vec<PackageName> {
        let start = self
            .names
            .iter()
            .position(|n| n == name)
            .unwrap_or(0);
        let mut cycle = self.names[start..].to_vec();
        cycle.push(name.clone());
        cycle
    }

    pub fn depth(&self) -> usize {
        self.names.len()
    }
}

/// A usable dependency handed to the depending package.
#[derive(Debug, Clone)]
pub struct DependencyResult {
    pub name: PackageName,
    pub entry: Arc<RegistryEntry>,
}

/// Walks a package's declared dependencies.
#[derive(Debug, Clone, Copy)]
pub struct DependencyResolver<'a> {
    book: &'a RecipeBook,
    toolchain: &'a Toolchain,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(book: &'a RecipeBook, toolchain: &'a Toolchain) -> Self {
        DependencyResolver { book, toolchain }
    }

    /// Check that the toolchain provides every language the package needs.
    pub fn check_toolchain(&self, package: &Package) -> Result<(), InstallError> {
        match self.toolchain.missing(&package.languages).first() {
            Some(language) => Err(InstallError::MissingToolchainComponent {
                package: package.name.clone(),
                language: *language,
            }),
            None => Ok(()),
        }
    }

    /// Resolve every dependency of `package`, in declared order.
    ///
    /// `visit` makes one dependency usable (typically by recursing into the
    /// installer) and returns its registry entry. `package` must already be
    /// on `stack`. Resolution stops at the first dependency that is unknown,
    /// closes a cycle, or failed; a failed dependency surfaces as
    /// `DependencyFailed` carrying the dependency's own error.
    pub fn resolve<F>(
        &self,
        package: &Package,
        stack: &mut ResolutionStack,
        mut visit: F,
    ) -> Result<Vec<DependencyResult>, InstallError>
    where
        F: FnMut(&Arc<Package>, &mut ResolutionStack) -> Result<Arc<RegistryEntry>, InstallError>,
    {
        self.check_toolchain(package)?;

        let mut results = Vec::with_capacity(package.dependencies.len());
        for dep_name in &package.dependencies {
            if stack.contains(dep_name.as_str()) {
                return Err(InstallError::CycleDependency {
                    cycle: stack.cycle_to(dep_name),
                });
            }

            let dependency = self
                .book
                .get(dep_name.as_str())
                .ok_or_else(|| InstallError::UnknownPackage {
                    name: dep_name.clone(),
                    referenced_by: Some(package.name.clone()),
                })?;

            tracing::debug!("`{}` requires `{}`", package.name, dep_name);
            let entry = visit(dependency, stack)?;

            match entry.status {
                EntryStatus::Usable(_) => results.push(DependencyResult {
                    name: dep_name.clone(),
                    entry,
                }),
                EntryStatus::Failed(ref failure) => {
                    return Err(InstallError::DependencyFailed {
                        package: package.name.clone(),
                        dependency: dep_name.clone(),
                        cause: failure.error.clone(),
                    });
                }
            }
        }

        Ok(results)
    }
}
