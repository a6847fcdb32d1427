//! Filesystem utilities.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Recursively copy a directory.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .with_context(|| format!("failed to create directory: {}", dst.display()))?;

    for entry in fs::read_dir(src)
        .with_context(|| format!("failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let ty = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if ty.is_dir() {
            copy_dir_all(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    src_path.display(),
                    dst_path.display()
                )
            })?;
        }
    }
    Ok(())
}

/// Remove a directory and all its contents, if it exists.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Whether a directory exists and has at least one entry.
pub fn is_nonempty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Write a string to a file, creating parent directories if needed.
pub fn write_string(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, contents)
        .with_context(|| format!("failed to write file: {}", path.display()))
}

/// Append a string to a file, creating it (and its parents) if needed.
pub fn append_string(path: &Path, contents: &str) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open file: {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write file: {}", path.display()))
}

/// Move a file, falling back to copy + remove across filesystems.
pub fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(e),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Identity of a file's contents, cheap enough to take before and after a
/// backend install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Record the stamp of every regular file under the given roots.
///
/// Missing roots are skipped.
pub fn stamp_tree(roots: &[PathBuf]) -> BTreeMap<PathBuf, FileStamp> {
    let mut stamps = BTreeMap::new();

    for root in roots {
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                stamps.insert(
                    entry.path().to_path_buf(),
                    FileStamp {
                        len: meta.len(),
                        modified: meta.modified().ok(),
                    },
                );
            }
        }
    }

    stamps
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_dir_all() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");

        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/file.txt"), "content").unwrap();

        copy_dir_all(&src, &dst).unwrap();

        assert_eq!(
            fs::read_to_string(dst.join("nested/file.txt")).unwrap(),
            "content"
        );
    }

    #[test]
    fn test_stamp_tree_sees_new_files() {
        let tmp = TempDir::new().unwrap();
        let lib = tmp.path().join("lib");
        fs::create_dir_all(&lib).unwrap();

        let before = stamp_tree(&[lib.clone(), tmp.path().join("missing")]);
        assert!(before.is_empty());

        fs::write(lib.join("libz.a"), "archive").unwrap();
        let after = stamp_tree(&[lib.clone()]);
        assert_eq!(after.len(), 1);
        assert_eq!(after[&lib.join("libz.a")].len, 7);
    }

    #[test]
    fn test_is_nonempty_dir() {
        let tmp = TempDir::new().unwrap();
        assert!(!is_nonempty_dir(tmp.path()));
        fs::write(tmp.path().join("f"), "").unwrap();
        assert!(is_nonempty_dir(tmp.path()));
        assert!(!is_nonempty_dir(&tmp.path().join("nope")));
    }
}
