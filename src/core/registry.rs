//! The install registry: what this run has resolved so far.
//!
//! Each package gets at most one entry per run, created exactly once and
//! never mutated afterwards. Concurrent requests for the same package are
//! collapsed: the first caller receives a [`BuildTicket`] and does the work,
//! later callers block until the ticket is completed and then read the
//! recorded entry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::discovery::{Attempt, ResolvedLibrarySet};

use super::error::{InstallError, InstallStage};
use super::package::{PackageName, Precision};

/// How a usable install came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    /// An install that already existed on the machine
    Existing,
    /// Built from source during this run
    Built,
}

/// A verified, usable install of a package.
#[derive(Debug, Clone)]
pub struct UsableInstall {
    /// The matched library set
    pub libraries: ResolvedLibrarySet,
    /// Include directories for consumers
    pub include_dirs: Vec<PathBuf>,
    /// Whether the install was found or built
    pub origin: Origin,
    /// Precisions that verified
    pub precisions: Vec<Precision>,
    /// Link-ordered libraries of this package's dependencies
    pub transitive_libraries: Vec<PathBuf>,
}

impl UsableInstall {
    /// This package's libraries followed by its dependencies', in link order.
    ///
    /// A library needed by several dependencies is kept at its last position
    /// so static archives still resolve left to right.
    pub fn link_libraries(&self) -> Vec<PathBuf> {
        link_order(
            self.libraries
                .libraries
                .iter()
                .chain(self.transitive_libraries.iter())
                .cloned(),
        )
    }
}

/// Drop repeated libraries, keeping each at its last position.
pub fn link_order<I>(libraries: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    let all: Vec<PathBuf> = libraries.into_iter().collect();
    let mut ordered = Vec::with_capacity(all.len());
    for (i, lib) in all.iter().enumerate() {
        if !all[i + 1..].contains(lib) {
            ordered.push(lib.clone());
        }
    }
    ordered
}

/// Why a package ended up unusable.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub error: Arc<InstallError>,
    /// Stage the package was in when it failed
    pub stage: InstallStage,
    /// (location, hypothesis) pairs tried while searching for an existing install
    pub attempts: Vec<Attempt>,
    /// Existing installs that were found but rejected, with the reason
    pub rejected: Vec<String>,
}

impl FailureRecord {
    pub fn new(error: InstallError, stage: InstallStage) -> Self {
        FailureRecord {
            error: Arc::new(error),
            stage,
            attempts: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Render the failure with the search history that led to it.
    pub fn to_diagnostic(&self) -> crate::util::Diagnostic {
        let mut diag = self
            .error
            .to_diagnostic()
            .with_context(format!("failed while {}", self.stage));

        for rejected in &self.rejected {
            diag = diag.with_context(format!("rejected existing install: {}", rejected));
        }
        for attempt in &self.attempts {
            diag = diag.with_context(format!("tried {}", attempt));
        }
        diag
    }
}

/// Final status of a package in this run.
#[derive(Debug, Clone)]
pub enum EntryStatus {
    Usable(UsableInstall),
    Failed(FailureRecord),
}

/// A registry entry.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub package: PackageName,
    pub status: EntryStatus,
    /// Per-package build log, if the package was built
    pub log_file: Option<PathBuf>,
}

impl RegistryEntry {
    pub fn usable(package: PackageName, install: UsableInstall) -> Self {
        RegistryEntry {
            package,
            status: EntryStatus::Usable(install),
            log_file: None,
        }
    }

    pub fn failed(package: PackageName, failure: FailureRecord) -> Self {
        RegistryEntry {
            package,
            status: EntryStatus::Failed(failure),
            log_file: None,
        }
    }

    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    /// Whether the package is usable by dependents.
    pub fn is_found(&self) -> bool {
        matches!(self.status, EntryStatus::Usable(_))
    }

    pub fn install(&self) -> Option<&UsableInstall> {
        match self.status {
            EntryStatus::Usable(ref install) => Some(install),
            EntryStatus::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        match self.status {
            EntryStatus::Failed(ref failure) => Some(failure),
            EntryStatus::Usable(_) => None,
        }
    }
}

#[derive(Debug)]
enum Slot {
    InFlight,
    Done(Arc<RegistryEntry>),
}

/// Result of claiming a package.
#[derive(Debug)]
pub enum Claim<'a> {
    /// The package was already resolved this run.
    Resolved(Arc<RegistryEntry>),
    /// The caller owns the single attempt for this package.
    Owned(BuildTicket<'a>),
}

/// Exclusive right to resolve one package.
///
/// Dropping a ticket without completing it releases the claim so a waiting
/// caller can try instead.
#[derive(Debug)]
pub struct BuildTicket<'a> {
    registry: &'a InstallRegistry,
    name: PackageName,
    completed: bool,
}

impl BuildTicket<'_> {
    pub fn package(&self) -> &PackageName {
        &self.name
    }

    /// Record the final entry and wake every waiter.
    pub fn complete(mut self, entry: RegistryEntry) -> Arc<RegistryEntry> {
        let entry = Arc::new(entry);
        {
            let mut slots = self.registry.lock();
            slots.insert(self.name.clone(), Slot::Done(entry.clone()));
        }
        self.completed = true;
        self.registry.ready.notify_all();
        entry
    }
}

impl Drop for BuildTicket<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.registry.lock().remove(&self.name);
            self.registry.ready.notify_all();
        }
    }
}

/// Process-wide record of resolved packages for one run.
#[derive(Debug, Default)]
pub struct InstallRegistry {
    slots: Mutex<HashMap<PackageName, Slot>>,
    ready: Condvar,
}

impl InstallRegistry {
    pub fn new() -> Self {
        InstallRegistry::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PackageName, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a package, blocking while another caller is resolving it.
    pub fn claim(&self, name: &PackageName) -> Claim<'_> {
        let mut slots = self.lock();
        loop {
            match slots.get(name) {
                Some(Slot::Done(entry)) => return Claim::Resolved(entry.clone()),
                Some(Slot::InFlight) => {
                    tracing::debug!("waiting for in-flight resolution of `{}`", name);
                    slots = self
                        .ready
                        .wait(slots)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                None => {
                    slots.insert(name.clone(), Slot::InFlight);
                    return Claim::Owned(BuildTicket {
                        registry: self,
                        name: name.clone(),
                        completed: false,
                    });
                }
            }
        }
    }

    /// The recorded entry for a package, if it has completed.
    pub fn get(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        match self.lock().get(name) {
            Some(Slot::Done(entry)) => Some(entry.clone()),
            _ => None,
        }
    }

    /// Whether the package was recorded as usable.
    pub fn found(&self, name: &str) -> bool {
        self.get(name).is_some_and(|e| e.is_found())
    }

    /// All completed entries, in name order.
    pub fn entries(&self) -> Vec<Arc<RegistryEntry>> {
        let mut entries: Vec<_> = self
            .lock()
            .values()
            .filter_map(|slot| match slot {
                Slot::Done(entry) => Some(entry.clone()),
                Slot::InFlight => None,
            })
            .collect();
        entries.sort_by(|a, b| a.package.cmp(&b.package));
        entries
    }

    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|s| matches!(s, Slot::Done(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::SearchLocation;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn usable(libs: &[&str], transitive: &[&str]) -> UsableInstall {
        UsableInstall {
            libraries: ResolvedLibrarySet {
                hypothesis: 0,
                libraries: libs.iter().map(PathBuf::from).collect(),
                location: SearchLocation::Default,
                include_dirs: vec![],
            },
            include_dirs: vec![],
            origin: Origin::Existing,
            precisions: vec![],
            transitive_libraries: transitive.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn test_claim_then_resolved() {
        let registry = InstallRegistry::new();
        let name = PackageName::from("x");

        let Claim::Owned(ticket) = registry.claim(&name) else {
            panic!("first claim must own the package");
        };
        ticket.complete(RegistryEntry::usable(name.clone(), usable(&["/l/libx.a"], &[])));

        match registry.claim(&name) {
            Claim::Resolved(entry) => assert!(entry.is_found()),
            Claim::Owned(_) => panic!("package resolved twice"),
        }
        assert!(registry.found("x"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_dropped_ticket_releases_claim() {
        let registry = InstallRegistry::new();
        let name = PackageName::from("x");

        if let Claim::Owned(ticket) = registry.claim(&name) {
            drop(ticket);
        }

        assert!(matches!(registry.claim(&name), Claim::Owned(_)));
        assert!(registry.get("x").is_none());
    }

    #[test]
    fn test_concurrent_claims_build_once() {
        let registry = Arc::new(InstallRegistry::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let name = PackageName::from("shared");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let builds = builds.clone();
                let name = name.clone();
                thread::spawn(move || match registry.claim(&name) {
                    Claim::Owned(ticket) => {
                        builds.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        ticket.complete(RegistryEntry::usable(
                            name.clone(),
                            usable(&["/l/libshared.a"], &[]),
                        ))
                    }
                    Claim::Resolved(entry) => entry,
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_found());
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_entry_is_not_found() {
        let registry = InstallRegistry::new();
        let name = PackageName::from("y");

        if let Claim::Owned(ticket) = registry.claim(&name) {
            ticket.complete(RegistryEntry::failed(
                name.clone(),
                FailureRecord::new(
                    InstallError::Cancelled {
                        package: name.clone(),
                    },
                    InstallStage::Building,
                ),
            ));
        }

        assert!(!registry.found("y"));
        assert!(registry.get("y").unwrap().failure().is_some());
    }

    #[test]
    fn test_link_libraries_keep_last_duplicate() {
        let install = usable(
            &["/p/libscalapack.a"],
            &["/p/liblapack.a", "/p/libblas.a", "/p/libmpi.so", "/p/libblas.a"],
        );

        assert_eq!(
            install.link_libraries(),
            vec![
                PathBuf::from("/p/libscalapack.a"),
                PathBuf::from("/p/liblapack.a"),
                PathBuf::from("/p/libmpi.so"),
                PathBuf::from("/p/libblas.a"),
            ]
        );
    }
}
