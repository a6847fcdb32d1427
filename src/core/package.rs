//! Package recipes - the static description of one external dependency.
//!
//! A recipe is data: where to fetch the sources, which library sets may
//! already satisfy it, which symbols prove an install is usable, which
//! backend builds it and what it depends on. Recipes are never mutated at
//! runtime.

use std::borrow::Borrow;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::builder::toolchain::Language;
use crate::builder::BackendSpec;

/// Identity of a package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    /// Create a package name.
    pub fn new(name: impl Into<String>) -> Self {
        PackageName(name.into())
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        PackageName(s.to_string())
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Precision variant a numerical package may be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Precision {
    Single,
    Double,
    Complex,
    DoubleComplex,
}

impl Precision {
    /// The conventional BLAS/LAPACK prefix letter for this precision.
    pub fn letter(&self) -> char {
        match self {
            Precision::Single => 's',
            Precision::Double => 'd',
            Precision::Complex => 'c',
            Precision::DoubleComplex => 'z',
        }
    }

    /// Name as written in recipes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Single => "single",
            Precision::Double => "double",
            Precision::Complex => "complex",
            Precision::DoubleComplex => "double-complex",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(Precision::Single),
            "double" => Ok(Precision::Double),
            "complex" => Ok(Precision::Complex),
            "double-complex" | "doublecomplex" => Ok(Precision::DoubleComplex),
            _ => Err(format!(
                "invalid precision '{}'; expected single, double, complex or double-complex",
                s
            )),
        }
    }
}

/// One candidate set of library file names that together satisfy a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LibraryHypothesis(Vec<String>);

impl LibraryHypothesis {
    /// Create a hypothesis from its member file names, in link order.
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LibraryHypothesis(members.into_iter().map(Into::into).collect())
    }

    /// Member file names, in link order.
    pub fn members(&self) -> &[String] {
        &self.0
    }

    /// Whether the hypothesis names no files.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LibraryHypothesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Where the sources of a package can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchLocation {
    /// A git repository, checked out at the version pin.
    Git(String),
    /// A gzip-compressed tarball.
    Tarball(String),
    /// A directory on the local filesystem.
    Local(PathBuf),
}

impl fmt::Display for FetchLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchLocation::Git(url) => write!(f, "git+{}", url),
            FetchLocation::Tarball(url) => f.write_str(url),
            FetchLocation::Local(path) => write!(f, "file://{}", path.display()),
        }
    }
}

/// Exact version a package's sources are pinned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionPin {
    /// A commit hash.
    Commit(String),
    /// A release tag.
    Tag(String),
}

impl VersionPin {
    /// The pinned revision string.
    pub fn as_str(&self) -> &str {
        match self {
            VersionPin::Commit(s) | VersionPin::Tag(s) => s,
        }
    }
}

impl fmt::Display for VersionPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionPin::Commit(c) => write!(f, "commit {}", &c[..c.len().min(12)]),
            VersionPin::Tag(t) => write!(f, "tag {}", t),
        }
    }
}

fn default_lib_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("lib"), PathBuf::from("lib64")]
}

/// A complete package recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Package {
    /// Package identity
    pub name: PackageName,

    /// Version the sources are pinned to
    #[serde(default)]
    pub pin: Option<VersionPin>,

    /// Fetch locations, tried in order
    #[serde(default)]
    pub fetch: Vec<FetchLocation>,

    /// Alternative library sets, evaluated strictly in declared order
    #[serde(default)]
    pub libraries: Vec<LibraryHypothesis>,

    /// Headers that must accompany an existing install
    #[serde(default)]
    pub includes: Vec<String>,

    /// Entry points that prove an install is usable; `{p}` expands to the
    /// precision letter
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Whether `symbols` follow the Fortran naming convention
    #[serde(default)]
    pub fortran_symbols: bool,

    /// Precision variants to probe
    #[serde(default)]
    pub precisions: Vec<Precision>,

    /// Toolchain components the package needs
    #[serde(default)]
    pub languages: Vec<Language>,

    /// Other packages that must be usable first
    #[serde(default)]
    pub dependencies: Vec<PackageName>,

    /// Library subdirectories under an install root
    #[serde(default = "default_lib_dirs")]
    pub lib_dirs: Vec<PathBuf>,

    /// How to build the package from source
    pub backend: BackendSpec,
}

impl Package {
    /// Create a recipe with no hypotheses, symbols or dependencies.
    pub fn new(name: impl Into<PackageName>, backend: BackendSpec) -> Self {
        Package {
            name: name.into(),
            pin: None,
            fetch: Vec::new(),
            libraries: Vec::new(),
            includes: Vec::new(),
            symbols: Vec::new(),
            fortran_symbols: false,
            precisions: Vec::new(),
            languages: Vec::new(),
            dependencies: Vec::new(),
            lib_dirs: default_lib_dirs(),
            backend,
        }
    }

    /// Whether the package declares a dependency on `name`.
    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d.as_str() == name)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        PackageName(s)
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pin {
            Some(ref pin) => write!(f, "{} ({})", self.name, pin),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_letters() {
        assert_eq!(Precision::Single.letter(), 's');
        assert_eq!(Precision::Double.letter(), 'd');
        assert_eq!(Precision::Complex.letter(), 'c');
        assert_eq!(Precision::DoubleComplex.letter(), 'z');
    }

    #[test]
    fn test_precision_from_str() {
        assert_eq!("Double".parse::<Precision>().unwrap(), Precision::Double);
        assert_eq!(
            "double-complex".parse::<Precision>().unwrap(),
            Precision::DoubleComplex
        );
        assert!("quad".parse::<Precision>().is_err());
    }

    #[test]
    fn test_parse_recipe() {
        let package: Package = toml::from_str(
            r#"
            name = "scalapack"
            pin = { commit = "0234af94c6578c53ac4c19f2925eb6e5c4ad6f0f" }
            fetch = [
                { git = "https://github.com/Reference-ScaLAPACK/scalapack" },
                { tarball = "https://github.com/Reference-ScaLAPACK/scalapack/archive/0234af94.tar.gz" },
            ]
            libraries = [["libscalapack.a"], ["libmkl_scalapack_lp64.a", "libmkl_blacs_openmpi_lp64.a"]]
            symbols = ["p{p}sytrd"]
            fortran-symbols = true
            precisions = ["single", "double"]
            languages = ["fortran"]
            dependencies = ["mpi", "blaslapack"]
            lib-dirs = ["lib", "lib/intel64"]

            [backend]
            kind = "cmake"
            "#,
        )
        .unwrap();

        assert_eq!(package.name.as_str(), "scalapack");
        assert_eq!(package.fetch.len(), 2);
        assert!(matches!(package.fetch[0], FetchLocation::Git(_)));
        assert_eq!(package.libraries[1].members().len(), 2);
        assert!(package.fortran_symbols);
        assert_eq!(package.precisions, vec![Precision::Single, Precision::Double]);
        assert!(package.depends_on("mpi"));
        assert_eq!(package.lib_dirs[1], PathBuf::from("lib/intel64"));
        assert_eq!(
            package.to_string(),
            "scalapack (commit 0234af94c657)"
        );
    }

    #[test]
    fn test_default_lib_dirs() {
        let package: Package = toml::from_str(
            r#"
            name = "zlib"
            [backend]
            kind = "custom"
            "#,
        )
        .unwrap();

        assert_eq!(
            package.lib_dirs,
            vec![PathBuf::from("lib"), PathBuf::from("lib64")]
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<Package, _> = toml::from_str(
            r#"
            name = "zlib"
            librarys = [["libz.a"]]
            [backend]
            kind = "custom"
            "#,
        );
        assert!(result.is_err());
    }
}
