//! Package sources.
//!
//! Fetching turns a recipe's ordered fetch locations and version pin into a
//! local source tree. Locations are tried in order; the first that yields a
//! tree wins and every failure message is kept for the report.

pub mod git;
pub mod local;
pub mod tarball;

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::{FetchLocation, InstallError, Package, PackageName};
use crate::util::fs::{is_nonempty_dir, remove_dir_all_if_exists};

pub use git::GitFetcher;
pub use local::LocalFetcher;
pub use tarball::TarballFetcher;

/// Errors raised while fetching sources.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("`{package}` declares no fetch locations")]
    NoLocations { package: PackageName },

    #[error("every fetch location for `{package}` failed")]
    AllFailed {
        package: PackageName,
        errors: Vec<String>,
    },
}

impl From<FetchError> for InstallError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NoLocations { package } => InstallError::NotFoundLocally { package },
            FetchError::AllFailed { package, errors } => {
                InstallError::FetchFailure { package, errors }
            }
        }
    }
}

/// Produces a local source tree for a package.
pub trait Fetcher: Send + Sync {
    /// Fetch the sources of `package`, returning the source directory.
    fn fetch(&self, package: &Package) -> Result<PathBuf, FetchError>;
}

/// Fetches from git, tarballs and local directories into a source cache.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    cache_dir: PathBuf,
    offline: bool,
}

impl SourceFetcher {
    /// Create a fetcher caching sources under `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        SourceFetcher {
            cache_dir: cache_dir.into(),
            offline: false,
        }
    }

    /// Skip network locations.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Cache directory for a package: `<name>-<cache key>`.
    pub fn checkout_dir(&self, package: &Package) -> PathBuf {
        self.cache_dir
            .join(format!("{}-{}", package.name, cache_key(package)))
    }

    fn fetch_location(&self, package: &Package, location: &FetchLocation, dest: &Path) -> anyhow::Result<()> {
        match location {
            FetchLocation::Git(url) => {
                anyhow::ensure!(!self.offline, "offline mode: skipping {}", location);
                GitFetcher::new(url, package.pin.as_ref()).fetch_into(dest)
            }
            FetchLocation::Tarball(url) => {
                anyhow::ensure!(!self.offline, "offline mode: skipping {}", location);
                TarballFetcher::new(url).fetch_into(dest)
            }
            FetchLocation::Local(path) => LocalFetcher::new(path).fetch_into(dest),
        }
    }
}

impl Fetcher for SourceFetcher {
    fn fetch(&self, package: &Package) -> Result<PathBuf, FetchError> {
        if package.fetch.is_empty() {
            return Err(FetchError::NoLocations {
                package: package.name.clone(),
            });
        }

        let dest = self.checkout_dir(package);
        if is_nonempty_dir(&dest) {
            tracing::debug!("reusing cached sources for `{}` at {}", package.name, dest.display());
            return Ok(dest);
        }

        let mut errors = Vec::new();
        for location in &package.fetch {
            tracing::info!("fetching `{}` from {}", package.name, location);
            match self.fetch_location(package, location, &dest) {
                Ok(()) => return Ok(dest),
                Err(e) => {
                    tracing::debug!("fetch from {} failed: {:#}", location, e);
                    errors.push(format!("{}: {:#}", location, e));
                    if let Err(e) = remove_dir_all_if_exists(&dest) {
                        tracing::warn!("cannot clean partial checkout: {:#}", e);
                    }
                }
            }
        }

        Err(FetchError::AllFailed {
            package: package.name.clone(),
            errors,
        })
    }
}

/// Twelve hex digits of sha256 over the pin and the fetch locations.
///
/// Fields are NUL-terminated and the pin is tagged, so an unpinned recipe
/// never collides with one pinned to an empty string.
fn cache_key(package: &Package) -> String {
    let mut hasher = Sha256::new();
    match package.pin {
        Some(ref pin) => {
            hasher.update(b"pin\0");
            hasher.update(pin.as_str().as_bytes());
            hasher.update(b"\0");
        }
        None => hasher.update(b"unpinned\0"),
    }
    for location in &package.fetch {
        hasher.update(location.to_string().as_bytes());
        hasher.update(b"\0");
    }
    let mut key = hex::encode(hasher.finalize());
    key.truncate(12);
    key
}

/// Hex sha256 of downloaded bytes, for logs.
pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
