//! Gzip tarball downloads.

use std::ffi::OsStr;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;

use crate::util::fs::{ensure_dir, remove_dir_all_if_exists};

/// Downloads and unpacks a `.tar.gz` archive.
#[derive(Debug, Clone)]
pub struct TarballFetcher<'a> {
    url: &'a str,
}

impl<'a> TarballFetcher<'a> {
    pub fn new(url: &'a str) -> Self {
        TarballFetcher { url }
    }

    /// Download the archive and unpack it into `dest`.
    pub fn fetch_into(&self, dest: &Path) -> Result<()> {
        tracing::info!("Downloading {}", self.url);

        let response = reqwest::blocking::get(self.url)
            .with_context(|| format!("failed to download {}", self.url))?;
        if !response.status().is_success() {
            bail!("failed to download {}: HTTP {}", self.url, response.status());
        }
        let bytes = response
            .bytes()
            .with_context(|| "failed to read tarball response body")?;

        tracing::debug!(
            "downloaded {} bytes (sha256 {})",
            bytes.len(),
            &super::sha256_hex(&bytes)[..16]
        );
        unpack(&bytes, dest).with_context(|| format!("failed to extract {}", self.url))
    }
}

/// Unpack a gzip tarball into `dest`.
///
/// Archives usually wrap everything in one top-level directory
/// (`scalapack-<commit>/`); when they do, its contents become `dest`.
pub fn unpack(data: &[u8], dest: &Path) -> Result<()> {
    let staging = staging_dir(dest);
    remove_dir_all_if_exists(&staging)?;
    ensure_dir(&staging)?;

    let mut archive = Archive::new(GzDecoder::new(Cursor::new(data)));
    archive
        .unpack(&staging)
        .with_context(|| format!("failed to unpack into {}", staging.display()))?;

    let entries: Vec<_> = std::fs::read_dir(&staging)?
        .filter_map(|e| e.ok())
        .collect();
    let root = match entries.as_slice() {
        [single] if single.path().is_dir() => single.path(),
        _ => staging.clone(),
    };

    remove_dir_all_if_exists(dest)?;
    std::fs::rename(&root, dest)
        .with_context(|| format!("failed to move sources to {}", dest.display()))?;
    remove_dir_all_if_exists(&staging)?;
    Ok(())
}

/// Sibling of `dest` that receives the raw archive contents. Keyed on the
/// whole file name so `foo.1` and `foo.2` never share one.
fn staging_dir(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(OsStr::to_os_string).unwrap_or_default();
    name.push(".unpack");
    dest.with_file_name(name)
}
