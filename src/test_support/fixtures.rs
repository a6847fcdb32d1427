//! Test fixtures for common test scenarios.

use std::path::{Path, PathBuf};

use crate::builder::BackendSpec;
use crate::core::{LibraryHypothesis, Origin, Package, RecipeBook, RegistryEntry, UsableInstall};
use crate::discovery::{ResolvedLibrarySet, SearchLocation};

/// A recipe with a custom backend and the given dependencies.
pub fn custom_package(name: &str, deps: &[&str]) -> Package {
    let mut package = Package::new(name, BackendSpec::default());
    package.dependencies = deps.iter().map(|d| (*d).into()).collect();
    package
}

/// A recipe book of custom-backend packages, `(name, dependencies)`.
pub fn book_from(packages: &[(&str, &[&str])]) -> RecipeBook {
    let packages = packages
        .iter()
        .map(|(name, deps)| custom_package(name, deps))
        .collect();
    match RecipeBook::from_packages(packages) {
        Ok(book) => book,
        Err(e) => panic!("invalid fixture book: {e}"),
    }
}

/// A usable registry entry found at the default location.
pub fn usable_entry(name: &str, libs: &[&str]) -> RegistryEntry {
    RegistryEntry::usable(
        name.into(),
        UsableInstall {
            libraries: ResolvedLibrarySet {
                hypothesis: 0,
                libraries: libs.iter().map(PathBuf::from).collect(),
                location: SearchLocation::Default,
                include_dirs: Vec::new(),
            },
            include_dirs: Vec::new(),
            origin: Origin::Existing,
            precisions: Vec::new(),
            transitive_libraries: Vec::new(),
        },
    )
}

/// Hypotheses from nested name lists.
pub fn hypotheses(sets: &[&[&str]]) -> Vec<LibraryHypothesis> {
    sets.iter()
        .map(|set| LibraryHypothesis::new(set.iter().copied()))
        .collect()
}

/// Create empty library (or header) files under `dir`.
pub fn touch_all(dir: &Path, names: &[&str]) {
    for name in names {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, b"!<arch>\n").unwrap();
    }
}
