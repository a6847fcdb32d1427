//! Dry-run planning: dependency order and build plans, nothing executed.
//!
//! Dependencies are assumed to end up in the install prefix under their
//! first library set, which is what a clean run would produce, so the
//! planned command lines show the paths a real build would receive.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::builder::{BuildBackendAdapter, BuildPlan, PlanContext, Toolchain};
use crate::core::{
    InstallError, Origin, Package, PackageName, RecipeBook, RegistryEntry, UsableInstall,
};
use crate::discovery::{ResolvedLibrarySet, SearchLocation};
use crate::resolver::{DependencyGraph, DependencyResult};
use crate::sources::SourceFetcher;

use super::installer::InstallOptions;

/// Planned build of one package.
#[derive(Debug, Clone, Serialize)]
pub struct PackagePlan {
    pub name: PackageName,
    pub dependencies: Vec<PackageName>,
    pub source_dir: PathBuf,
    pub plan: BuildPlan,
}

/// Everything a run would do, dependencies first.
#[derive(Debug, Clone, Serialize)]
pub struct InstallPlan {
    /// Groups of packages that could build in parallel
    pub levels: Vec<Vec<PackageName>>,
    pub packages: Vec<PackagePlan>,
}

impl InstallPlan {
    pub fn order(&self) -> Vec<&PackageName> {
        self.packages.iter().map(|p| &p.name).collect()
    }

    pub fn package(&self, name: &str) -> Option<&PackagePlan> {
        self.packages.iter().find(|p| p.name.as_str() == name)
    }

    /// Human-readable listing.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, package) in self.packages.iter().enumerate() {
            out.push_str(&format!(
                "{}. {} ({})\n",
                i + 1,
                package.name,
                package.plan.backend
            ));
            if !package.dependencies.is_empty() {
                let deps: Vec<&str> = package.dependencies.iter().map(PackageName::as_str).collect();
                out.push_str(&format!("   after: {}\n", deps.join(", ")));
            }
            for step in package.plan.describe() {
                out.push_str(&format!("   {}\n", step));
            }
        }
        out
    }
}

/// Plan a run for `roots` without touching the filesystem.
pub fn plan_install(
    book: &RecipeBook,
    roots: &[PackageName],
    toolchain: &Toolchain,
    prefix: &Path,
    options: &InstallOptions,
) -> Result<InstallPlan, InstallError> {
    let graph = DependencyGraph::from_roots(book, roots)?;
    graph.check_acyclic()?;

    let sources = SourceFetcher::new(options.work_dir.join("src"));
    let mut assumed: HashMap<PackageName, Arc<RegistryEntry>> = HashMap::new();
    let mut packages = Vec::new();

    for name in graph.build_order() {
        let Some(package) = book.get(name.as_str()) else {
            continue;
        };

        let dependencies: Vec<DependencyResult> = package
            .dependencies
            .iter()
            .filter_map(|dep| {
                assumed.get(dep).map(|entry| DependencyResult {
                    name: dep.clone(),
                    entry: entry.clone(),
                })
            })
            .collect();

        let source_dir = sources.checkout_dir(package);
        let ctx = PlanContext {
            package,
            source_dir: source_dir.clone(),
            build_dir: options.work_dir.join("build").join(name.as_str()),
            prefix: prefix.to_path_buf(),
            toolchain,
            dependencies: &dependencies,
            jobs: options.jobs,
            timeout: options.timeout,
        };
        let adapter = BuildBackendAdapter::for_package(package);
        let plan = adapter.plan(&ctx);

        assumed.insert(
            name.clone(),
            Arc::new(assumed_entry(package, prefix, adapter.configure_library(prefix), &dependencies)),
        );
        packages.push(PackagePlan {
            name,
            dependencies: package.dependencies.clone(),
            source_dir,
            plan,
        });
    }

    Ok(InstallPlan {
        levels: graph.levels(),
        packages,
    })
}

/// Registry entry a package would get after a clean build.
fn assumed_entry(
    package: &Package,
    prefix: &Path,
    configured: Option<ResolvedLibrarySet>,
    dependencies: &[DependencyResult],
) -> RegistryEntry {
    let lib_dir = package
        .lib_dirs
        .first()
        .cloned()
        .unwrap_or_else(|| PathBuf::from("lib"));

    let libraries = configured.unwrap_or_else(|| ResolvedLibrarySet {
        hypothesis: 0,
        libraries: package
            .libraries
            .first()
            .map(|h| h.members().iter().map(|m| prefix.join(&lib_dir).join(m)).collect())
            .unwrap_or_default(),
        location: SearchLocation::under(prefix, &lib_dir),
        include_dirs: vec![prefix.join("include")],
    });

    RegistryEntry::usable(
        package.name.clone(),
        UsableInstall {
            include_dirs: libraries.include_dirs.clone(),
            libraries,
            origin: Origin::Built,
            precisions: package.precisions.clone(),
            transitive_libraries: dependencies
                .iter()
                .filter_map(|d| d.entry.install())
                .flat_map(|i| i.link_libraries())
                .collect(),
        },
    )
}
