//! First-viable matching of library hypotheses against search locations.
//!
//! Locations are the outer loop and hypotheses the inner one: the first
//! location that satisfies any hypothesis wins, and within a location the
//! first declared hypothesis wins. A hypothesis is satisfied only when every
//! one of its member files exists there.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::LibraryHypothesis;

use super::planner::SearchLocation;

/// The outcome of a successful match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLibrarySet {
    /// Index of the matched hypothesis in declared order
    pub hypothesis: usize,
    /// Absolute paths of the member files, in link order
    pub libraries: Vec<PathBuf>,
    /// Where the set was found
    pub location: SearchLocation,
    /// Include directories accompanying the libraries
    pub include_dirs: Vec<PathBuf>,
}

/// One (location, hypothesis) pair that did not match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub location: SearchLocation,
    /// Index of the hypothesis in declared order
    pub hypothesis: usize,
    /// Member libraries that were not present
    pub missing: Vec<String>,
    /// Required headers that were not present
    pub missing_headers: Vec<String>,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (hypothesis #{}): ", self.location, self.hypothesis + 1)?;
        let mut missing: Vec<&str> = self.missing.iter().map(String::as_str).collect();
        missing.extend(self.missing_headers.iter().map(String::as_str));
        write!(f, "missing {}", missing.join(", "))
    }
}

/// Result of matching; "not found" is an ordinary outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Found(ResolvedLibrarySet),
    NotFound { attempts: Vec<Attempt> },
}

impl MatchOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, MatchOutcome::Found(_))
    }
}

/// Finds the first hypothesis fully present under some location.
#[derive(Debug, Clone)]
pub struct LibraryHypothesisMatcher {
    system_lib_dirs: Vec<PathBuf>,
    system_include_dirs: Vec<PathBuf>,
}

impl LibraryHypothesisMatcher {
    /// Create a matcher whose default location resolves against `system_lib_dirs`.
    pub fn new(system_lib_dirs: Vec<PathBuf>) -> Self {
        LibraryHypothesisMatcher {
            system_lib_dirs,
            system_include_dirs: Vec::new(),
        }
    }

    /// Use explicit directories for header checks at the default location.
    pub fn with_system_include_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.system_include_dirs = dirs;
        self
    }

    /// Matcher for the host's standard library and include paths.
    ///
    /// `LIBRARY_PATH` entries come first; `configured` replaces the built-in
    /// list of standard directories when non-empty.
    pub fn from_environment(configured: &[PathBuf]) -> Self {
        let mut lib_dirs = path_list("LIBRARY_PATH");
        if configured.is_empty() {
            lib_dirs.extend(standard_lib_dirs());
        } else {
            lib_dirs.extend(configured.iter().cloned());
        }

        let mut include_dirs = path_list("CPATH");
        include_dirs.extend(path_list("C_INCLUDE_PATH"));
        include_dirs.push(PathBuf::from("/usr/local/include"));
        include_dirs.push(PathBuf::from("/usr/include"));

        LibraryHypothesisMatcher {
            system_lib_dirs: lib_dirs,
            system_include_dirs: include_dirs,
        }
    }

    /// Standard library directories this matcher searches for the default location.
    pub fn system_lib_dirs(&self) -> &[PathBuf] {
        &self.system_lib_dirs
    }

    /// Find the first (location, hypothesis) pair whose files all exist.
    ///
    /// `includes` are headers that must accompany the libraries; a location
    /// missing any of them does not match.
    pub fn find_match<I>(
        &self,
        hypotheses: &[LibraryHypothesis],
        includes: &[String],
        locations: I,
    ) -> MatchOutcome
    where
        I: IntoIterator<Item = SearchLocation>,
    {
        let mut attempts = Vec::new();

        for location in locations {
            let header_dirs = self.header_dirs(&location);
            let (found_headers, missing_headers) = resolve_all(includes, &header_dirs);

            for (index, hypothesis) in hypotheses.iter().enumerate() {
                let (libraries, missing) = match location {
                    SearchLocation::Default => {
                        resolve_all(hypothesis.members(), &self.system_lib_dirs)
                    }
                    SearchLocation::Directory { ref lib_dir, .. } => {
                        resolve_all(hypothesis.members(), std::slice::from_ref(lib_dir))
                    }
                };

                if missing.is_empty() && missing_headers.is_empty() {
                    tracing::debug!(
                        "matched hypothesis #{} {} at {}",
                        index + 1,
                        hypothesis,
                        location
                    );
                    let include_dirs = match location {
                        SearchLocation::Default => parents_of(&found_headers, includes),
                        SearchLocation::Directory { ref root, .. } => {
                            let dir = root.join("include");
                            if dir.is_dir() {
                                vec![dir]
                            } else {
                                Vec::new()
                            }
                        }
                    };

                    return MatchOutcome::Found(ResolvedLibrarySet {
                        hypothesis: index,
                        libraries,
                        location,
                        include_dirs,
                    });
                }

                let attempt = Attempt {
                    location: location.clone(),
                    hypothesis: index,
                    missing,
                    missing_headers: if libraries_complete(hypothesis, &libraries) {
                        missing_headers.clone()
                    } else {
                        Vec::new()
                    },
                };
                tracing::debug!("no match: {}", attempt);
                attempts.push(attempt);
            }
        }

        MatchOutcome::NotFound { attempts }
    }

    fn header_dirs(&self, location: &SearchLocation) -> Vec<PathBuf> {
        match location {
            SearchLocation::Default => self.system_include_dirs.clone(),
            SearchLocation::Directory { root, .. } => vec![root.join("include")],
        }
    }
}

fn libraries_complete(hypothesis: &LibraryHypothesis, resolved: &[PathBuf]) -> bool {
    hypothesis.members().len() == resolved.len()
}

/// Resolve each name against the first directory containing it.
fn resolve_all(names: &[String], dirs: &[PathBuf]) -> (Vec<PathBuf>, Vec<String>) {
    let mut found = Vec::with_capacity(names.len());
    let mut missing = Vec::new();

    for name in names {
        match dirs.iter().map(|d| d.join(name)).find(|p| p.is_file()) {
            Some(path) => found.push(path),
            None => missing.push(name.clone()),
        }
    }

    (found, missing)
}

/// Directories the resolved headers were found in, deduplicated in order.
fn parents_of(found: &[PathBuf], names: &[String]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for (path, name) in found.iter().zip(names) {
        // Strip the relative header path (e.g. `mpi/mpi.h`) to get the include root.
        let depth = Path::new(name).components().count();
        let mut dir = path.as_path();
        for _ in 0..depth {
            dir = dir.parent().unwrap_or(dir);
        }
        if !dirs.iter().any(|d| d == dir) {
            dirs.push(dir.to_path_buf());
        }
    }
    dirs
}

fn path_list(var: &str) -> Vec<PathBuf> {
    std::env::var_os(var)
        .map(|v| {
            std::env::split_paths(&v)
                .filter(|p| !p.as_os_str().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn standard_lib_dirs() -> Vec<PathBuf> {
    let multiarch = format!("/usr/lib/{}-linux-gnu", std::env::consts::ARCH);
    [
        "/usr/local/lib",
        "/usr/local/lib64",
        multiarch.as_str(),
        "/usr/lib",
        "/usr/lib64",
        "/lib",
        "/lib64",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}
