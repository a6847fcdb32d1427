//! The recipe book: every package quay knows how to locate or build.
//!
//! Recipes live in a TOML file as an array of `[[package]]` tables. The book
//! is loaded once and shared read-only by the whole run.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use miette::{Diagnostic as MietteDiagnostic, NamedSource, SourceSpan};
use serde::Deserialize;
use thiserror::Error;

use super::package::{Package, PackageName};

/// Recipe book that ships with quay.
pub const DEFAULT_RECIPES: &str = include_str!("../../recipes/default.toml");

/// Errors raised while loading a recipe book.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum RecipeError {
    #[error("failed to read recipe book `{path}`")]
    #[diagnostic(code(quay::recipe::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid recipe book: {message}")]
    #[diagnostic(code(quay::recipe::parse))]
    Parse {
        message: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: Option<SourceSpan>,
    },

    #[error("package `{0}` is declared more than once")]
    #[diagnostic(code(quay::recipe::duplicate))]
    Duplicate(PackageName),

    #[error("package `{package}` depends on unknown package `{dependency}`")]
    #[diagnostic(
        code(quay::recipe::unknown_dependency),
        help("Declare `{dependency}` in the recipe book or remove the reference")
    )]
    UnknownDependency {
        package: PackageName,
        dependency: PackageName,
    },

    #[error("package `{package}` declares an empty library hypothesis")]
    #[diagnostic(code(quay::recipe::empty_hypothesis))]
    EmptyHypothesis { package: PackageName },

    #[error(
        "package `{package}` passes `{variable}` from `{dependency}`, which it does not depend on"
    )]
    #[diagnostic(code(quay::recipe::undeclared_dependency))]
    UndeclaredVariableDependency {
        package: PackageName,
        variable: String,
        dependency: PackageName,
    },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RecipeFile {
    #[serde(default)]
    package: Vec<Package>,
}

/// All known package recipes, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct RecipeBook {
    packages: BTreeMap<PackageName, Arc<Package>>,
}

impl RecipeBook {
    /// Parse and validate a recipe book.
    pub fn parse(contents: &str, origin: &str) -> Result<Self, RecipeError> {
        let file: RecipeFile = toml::from_str(contents).map_err(|e| RecipeError::Parse {
            message: e.message().to_string(),
            src: NamedSource::new(origin, contents.to_string()),
            span: e.span().map(SourceSpan::from),
        })?;

        Self::from_packages(file.package)
    }

    /// Load a recipe book from disk.
    pub fn load(path: &Path) -> Result<Self, RecipeError> {
        let contents = std::fs::read_to_string(path).map_err(|source| RecipeError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Self::parse(&contents, &path.display().to_string())
    }

    /// The recipe book bundled with quay.
    pub fn builtin() -> Result<Self, RecipeError> {
        Self::parse(DEFAULT_RECIPES, "recipes/default.toml")
    }

    /// Build a book from already-parsed recipes.
    pub fn from_packages(packages: Vec<Package>) -> Result<Self, RecipeError> {
        let mut book = RecipeBook::default();
        for package in packages {
            if book.packages.contains_key(&package.name) {
                return Err(RecipeError::Duplicate(package.name));
            }
            book.packages.insert(package.name.clone(), Arc::new(package));
        }

        book.validate()?;
        Ok(book)
    }

    fn validate(&self) -> Result<(), RecipeError> {
        for package in self.packages.values() {
            for dependency in &package.dependencies {
                if !self.packages.contains_key(dependency) {
                    return Err(RecipeError::UnknownDependency {
                        package: package.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }

            if package.libraries.iter().any(|h| h.is_empty()) {
                return Err(RecipeError::EmptyHypothesis {
                    package: package.name.clone(),
                });
            }

            for var in package.backend.dependency_variables() {
                if !package.depends_on(var.dependency.as_str()) {
                    return Err(RecipeError::UndeclaredVariableDependency {
                        package: package.name.clone(),
                        variable: var.variable.clone(),
                        dependency: var.dependency.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Look up a recipe.
    pub fn get(&self, name: &str) -> Option<&Arc<Package>> {
        self.packages.get(name)
    }

    /// Whether the book contains a recipe for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Iterate recipes in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Package>> {
        self.packages.values()
    }

    /// Names of all recipes.
    pub fn names(&self) -> Vec<PackageName> {
        self.packages.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_book_is_valid() {
        let book = RecipeBook::builtin().unwrap();

        let scalapack = book.get("scalapack").unwrap();
        assert!(scalapack.depends_on("mpi"));
        assert!(scalapack.depends_on("blaslapack"));
        assert_eq!(scalapack.libraries[0].members(), &["libscalapack.a".to_string()]);
        assert!(book.contains("ctetgen"));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = RecipeBook::parse(
            r#"
            [[package]]
            name = "y"
            dependencies = ["z"]
            backend = { kind = "custom" }
            "#,
            "test.toml",
        )
        .unwrap_err();

        assert!(matches!(err, RecipeError::UnknownDependency { .. }));
        assert_eq!(
            err.to_string(),
            "package `y` depends on unknown package `z`"
        );
    }

    #[test]
    fn test_duplicate_package() {
        let err = RecipeBook::parse(
            r#"
            [[package]]
            name = "x"
            backend = { kind = "custom" }

            [[package]]
            name = "x"
            backend = { kind = "custom" }
            "#,
            "test.toml",
        )
        .unwrap_err();

        assert!(matches!(err, RecipeError::Duplicate(_)));
    }

    #[test]
    fn test_empty_hypothesis_rejected() {
        let err = RecipeBook::parse(
            r#"
            [[package]]
            name = "x"
            libraries = [["libx.a"], []]
            backend = { kind = "custom" }
            "#,
            "test.toml",
        )
        .unwrap_err();

        assert!(matches!(err, RecipeError::EmptyHypothesis { .. }));
    }

    #[test]
    fn test_parse_error_carries_span() {
        let err = RecipeBook::parse("[[package]]\nname = 3\n", "broken.toml").unwrap_err();

        match err {
            RecipeError::Parse { span, .. } => assert!(span.is_some()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_variable_must_reference_declared_dependency() {
        let err = RecipeBook::parse(
            r#"
            [[package]]
            name = "blas"
            backend = { kind = "custom" }

            [[package]]
            name = "solver"
            [package.backend]
            kind = "cmake"
            dependency-variables = [
                { variable = "BLAS_LIBRARIES", dependency = "blas", value = "libraries" },
            ]
            "#,
            "test.toml",
        )
        .unwrap_err();

        assert!(matches!(
            err,
            RecipeError::UndeclaredVariableDependency { .. }
        ));
    }
}
