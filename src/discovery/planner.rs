//! Candidate install locations for a package.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::Package;

/// One place a package's libraries might be found.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum SearchLocation {
    /// The standard system library search path.
    Default,
    /// A library directory under an install root.
    Directory { root: PathBuf, lib_dir: PathBuf },
}

impl SearchLocation {
    /// Library directory under an install root.
    pub fn under(root: &Path, subdir: &Path) -> Self {
        SearchLocation::Directory {
            root: root.to_path_buf(),
            lib_dir: root.join(subdir),
        }
    }
}

impl fmt::Display for SearchLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchLocation::Default => write!(f, "<system library path>"),
            SearchLocation::Directory { lib_dir, .. } => write!(f, "{}", lib_dir.display()),
        }
    }
}

/// Install roots named by environment variables, such as a vendor math kit.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentRoots {
    roots: Vec<(String, PathBuf)>,
}

impl EnvironmentRoots {
    /// Read the named variables; unset or empty ones are skipped.
    pub fn from_env(names: &[String]) -> Self {
        Self::from_pairs(
            names
                .iter()
                .filter_map(|name| std::env::var_os(name).map(|v| (name.clone(), PathBuf::from(v)))),
        )
    }

    /// Build from explicit (variable, root) pairs, preserving order.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, PathBuf)>,
        S: Into<String>,
    {
        EnvironmentRoots {
            roots: pairs
                .into_iter()
                .filter(|(_, root)| !root.as_os_str().is_empty())
                .map(|(name, root)| (name.into(), root))
                .collect(),
        }
    }

    /// Iterate (variable, root) pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> + Clone {
        self.roots.iter().map(|(n, r)| (n.as_str(), r.as_path()))
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Enumerates candidate library directories for one package.
///
/// Order is match priority: the standard path first, then the user override
/// prefix, then environment roots, then the shared install prefix. Each root
/// is expanded with every library subdirectory the recipe declares.
#[derive(Debug, Clone)]
pub struct LibrarySearchPlanner<'a> {
    lib_dirs: &'a [PathBuf],
    include_default: bool,
    user_prefix: Option<&'a Path>,
    env_roots: Option<&'a EnvironmentRoots>,
    install_prefix: Option<&'a Path>,
}

impl<'a> LibrarySearchPlanner<'a> {
    /// Plan for a package's declared library subdirectories.
    pub fn new(package: &'a Package) -> Self {
        Self::for_lib_dirs(&package.lib_dirs)
    }

    /// Plan for explicit library subdirectories.
    pub fn for_lib_dirs(lib_dirs: &'a [PathBuf]) -> Self {
        LibrarySearchPlanner {
            lib_dirs,
            include_default: true,
            user_prefix: None,
            env_roots: None,
            install_prefix: None,
        }
    }

    /// Search an existing install directory supplied by the user.
    pub fn with_user_prefix(mut self, prefix: Option<&'a Path>) -> Self {
        self.user_prefix = prefix;
        self
    }

    /// Search roots named by environment variables.
    pub fn with_env_roots(mut self, roots: &'a EnvironmentRoots) -> Self {
        self.env_roots = Some(roots);
        self
    }

    /// Search the shared install prefix after every other location.
    pub fn with_install_prefix(mut self, prefix: &'a Path) -> Self {
        self.install_prefix = Some(prefix);
        self
    }

    /// Skip the standard system path.
    pub fn without_default(mut self) -> Self {
        self.include_default = false;
        self
    }

    /// Lazily enumerate candidate locations. The iterator is cheap to clone,
    /// so the sequence can be restarted.
    pub fn locations(&self) -> impl Iterator<Item = SearchLocation> + Clone + 'a {
        let lib_dirs = self.lib_dirs;
        let expand = move |root: &'a Path| {
            lib_dirs
                .iter()
                .map(move |sub| SearchLocation::under(root, sub))
        };

        let default = self
            .include_default
            .then_some(SearchLocation::Default)
            .into_iter();
        let user = self.user_prefix.into_iter().flat_map(expand);
        let env = self
            .env_roots
            .into_iter()
            .flat_map(|roots| roots.iter().map(|(_, root)| root))
            .flat_map(expand);
        let installed = self.install_prefix.into_iter().flat_map(expand);

        default.chain(user).chain(env).chain(installed)
    }
}
