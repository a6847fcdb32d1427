//! The shared install prefix and its attribution ledger.
//!
//! Every package installs into the same `include/` and `lib/` tree. The
//! prefix records which package wrote each file, so a later install can never
//! silently replace an earlier package's artifact. The only sanctioned way to
//! move an artifact into a contested name is an explicit, logged relocation.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::util::fs::{move_file, stamp_tree, FileStamp};
use crate::util::process::{CommandRunner, ProcessBuilder};

use super::error::InstallError;
use super::package::PackageName;

/// Snapshot of the tracked prefix directories.
pub type PrefixSnapshot = BTreeMap<PathBuf, FileStamp>;

struct Privileged {
    program: String,
    runner: Arc<dyn CommandRunner>,
}

/// The shared install prefix.
pub struct InstallPrefix {
    root: PathBuf,
    privileged: Option<Privileged>,
    owners: Mutex<HashMap<PathBuf, PackageName>>,
    install_lock: Mutex<()>,
}

impl std::fmt::Debug for InstallPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallPrefix")
            .field("root", &self.root)
            .field("privileged", &self.privileged.as_ref().map(|p| &p.program))
            .finish()
    }
}

impl InstallPrefix {
    /// Create a prefix rooted at `root`. Nothing is created on disk yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        InstallPrefix {
            root: root.into(),
            privileged: None,
            owners: Mutex::new(HashMap::new()),
            install_lock: Mutex::new(()),
        }
    }

    /// Run prefix mutations through an elevation program such as `sudo`.
    pub fn with_privileged(mut self, program: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        self.privileged = Some(Privileged {
            program: program.into(),
            runner,
        });
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn include_dir(&self) -> PathBuf {
        self.root.join("include")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.root.join("lib")
    }

    /// Directories whose contents are attributed to packages.
    pub fn tracked_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.include_dir(),
            self.lib_dir(),
            self.root.join("lib64"),
        ]
    }

    /// Serialize install phases so prefix changes can be attributed.
    pub fn lock_install(&self) -> MutexGuard<'_, ()> {
        self.install_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn owners(&self) -> MutexGuard<'_, HashMap<PathBuf, PackageName>> {
        self.owners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Capture sizes and modification times of every tracked file.
    pub fn snapshot(&self) -> PrefixSnapshot {
        stamp_tree(&self.tracked_dirs())
    }

    /// Package that installed `path` during this run, if any.
    pub fn owner(&self, path: &Path) -> Option<PackageName> {
        self.owners().get(path).cloned()
    }

    /// Record `package` as the owner of `path`, refusing to take over a file
    /// another package installed.
    pub fn claim(&self, package: &PackageName, path: &Path) -> Result<(), InstallError> {
        let mut owners = self.owners();
        match owners.get(path) {
            Some(owner) if owner != package => Err(InstallError::PrefixConflict {
                package: package.clone(),
                owner: owner.clone(),
                path: path.to_path_buf(),
            }),
            _ => {
                owners.insert(path.to_path_buf(), package.clone());
                Ok(())
            }
        }
    }

    /// Attribute every file that appeared or changed between two snapshots.
    ///
    /// Returns the changed files, or `PrefixConflict` if one of them belongs
    /// to a different package.
    pub fn attribute_changes(
        &self,
        package: &PackageName,
        before: &PrefixSnapshot,
        after: &PrefixSnapshot,
    ) -> Result<Vec<PathBuf>, InstallError> {
        let changed: Vec<PathBuf> = after
            .iter()
            .filter(|(path, stamp)| before.get(*path) != Some(*stamp))
            .map(|(path, _)| path.clone())
            .collect();

        let mut owners = self.owners();
        for path in &changed {
            if let Some(owner) = owners.get(path) {
                if owner != package {
                    return Err(InstallError::PrefixConflict {
                        package: package.clone(),
                        owner: owner.clone(),
                        path: path.clone(),
                    });
                }
            }
        }
        for path in &changed {
            owners.insert(path.clone(), package.clone());
        }

        tracing::debug!("`{}` installed {} file(s) into the prefix", package, changed.len());
        Ok(changed)
    }

    /// Create directories under the prefix.
    pub fn make_dirs(&self, package: &PackageName, dirs: &[PathBuf]) -> Result<(), InstallError> {
        for dir in dirs {
            let result = match self.privileged {
                Some(ref p) => run_privileged(p, "mkdir", &[OsStr::new("-p"), dir.as_os_str()]),
                None => std::fs::create_dir_all(dir),
            };
            result.map_err(|e| relocation_error(package, dir, e))?;
        }
        Ok(())
    }

    /// Copy a file into the prefix and record its owner.
    pub fn copy_into(&self, package: &PackageName, from: &Path, to: &Path) -> Result<(), InstallError> {
        self.claim(package, to)?;
        let result = match self.privileged {
            Some(ref p) => run_privileged(p, "cp", &[from.as_os_str(), to.as_os_str()]),
            None => std::fs::copy(from, to).map(|_| ()),
        };
        result.map_err(|e| relocation_error(package, to, e))?;
        tracing::debug!("copied {} -> {}", from.display(), to.display());
        Ok(())
    }

    /// Move a build artifact to its final name in the prefix.
    pub fn relocate(&self, package: &PackageName, from: &Path, to: &Path) -> Result<(), InstallError> {
        self.claim(package, to)?;
        let result = match self.privileged {
            Some(ref p) => run_privileged(p, "mv", &[from.as_os_str(), to.as_os_str()]),
            None => move_file(from, to),
        };
        result.map_err(|e| relocation_error(package, to, e))?;
        tracing::info!(
            "relocated `{}` artifact {} -> {}",
            package,
            from.display(),
            to.display()
        );
        Ok(())
    }

    /// Remove a stale file this package is about to regenerate.
    pub fn remove_stale(&self, package: &PackageName, path: &Path) -> Result<(), InstallError> {
        if !path.exists() {
            return Ok(());
        }
        if let Some(owner) = self.owner(path) {
            if &owner != package {
                return Err(InstallError::PrefixConflict {
                    package: package.clone(),
                    owner,
                    path: path.to_path_buf(),
                });
            }
        }
        let result = match self.privileged {
            Some(ref p) if path.starts_with(&self.root) => {
                run_privileged(p, "rm", &[OsStr::new("-f"), path.as_os_str()])
            }
            _ => std::fs::remove_file(path),
        };
        result.map_err(|e| relocation_error(package, path, e))
    }
}

fn run_privileged(p: &Privileged, tool: &str, args: &[&OsStr]) -> io::Result<()> {
    let cmd = ProcessBuilder::new(&p.program).arg(tool).args(args.iter().copied());
    let output = p
        .runner
        .run(&cmd)
        .map_err(|e| io::Error::other(format!("{:#}", e)))?;

    if output.success() {
        Ok(())
    } else {
        let stderr = output.stderr.trim();
        let kind = if stderr.contains("Permission denied") || stderr.contains("not permitted") {
            io::ErrorKind::PermissionDenied
        } else {
            io::ErrorKind::Other
        };
        Err(io::Error::new(
            kind,
            format!("`{}` failed: {}", cmd.display_command(), stderr),
        ))
    }
}

fn relocation_error(package: &PackageName, target: &Path, err: io::Error) -> InstallError {
    InstallError::RelocationFailure {
        package: package.clone(),
        target: target.to_path_buf(),
        permission_denied: err.kind() == io::ErrorKind::PermissionDenied,
        message: err.to_string(),
    }
}
