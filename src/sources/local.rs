//! Local source directories.

use std::path::Path;

use anyhow::{bail, Result};

use crate::util::fs::copy_dir_all;

/// Copies a source tree from the local filesystem.
///
/// The tree is copied rather than built in place so a backend writing into
/// its source directory never dirties the original.
#[derive(Debug, Clone)]
pub struct LocalFetcher<'a> {
    path: &'a Path,
}

impl<'a> LocalFetcher<'a> {
    pub fn new(path: &'a Path) -> Self {
        LocalFetcher { path }
    }

    pub fn fetch_into(&self, dest: &Path) -> Result<()> {
        if !self.path.is_dir() {
            bail!("source directory {} does not exist", self.path.display());
        }
        tracing::debug!("copying {} -> {}", self.path.display(), dest.display());
        copy_dir_all(self.path, dest)
    }
}
