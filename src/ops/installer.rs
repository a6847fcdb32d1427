//! Per-package install driver.
//!
//! [`PackageInstaller::ensure`] takes one package through its stages:
//!
//! ```text
//! NotStarted -> ResolvingDependencies -> SearchingExisting -> Usable
//!                                               |
//!                                               v
//!                     Fetching -> Building -> Installing -> Verifying -> Usable
//! ```
//!
//! Any stage may end in `Failed`. Nothing is retried within a run: the first
//! outcome is recorded in the [`InstallRegistry`] and every later request for
//! the package reads it back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::builder::{BuildBackendAdapter, Phase, PlanContext, PlanExecutor, Toolchain};
use crate::core::{
    link_order, Claim, FailureRecord, InstallError, InstallPrefix, InstallRegistry, InstallStage,
    Origin, Package, PackageName, RecipeBook, RegistryEntry, UsableInstall,
};
use crate::discovery::{
    Attempt, EnvironmentRoots, LibraryHypothesisMatcher, LibrarySearchPlanner, MatchOutcome,
    ResolvedLibrarySet, SearchLocation,
};
use crate::probe::{PrecisionPolicy, ProbeError, ProbeRequest, ProbeVerdict, SymbolProbe};
use crate::resolver::{DependencyResolver, DependencyResult, ResolutionStack};
use crate::sources::Fetcher;
use crate::util::config::{Config, DEFAULT_PROBE_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS};
use crate::util::fs::{ensure_dir, write_string};
use crate::util::process::CommandRunner;

use super::events::{discard, EventSink, InstallEvent};

/// Run-wide install settings.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Root for sources, build trees, probes and logs
    pub work_dir: PathBuf,
    /// Parallel jobs handed to backends
    pub jobs: usize,
    /// Timeout for each backend invocation
    pub timeout: Duration,
    /// Timeout for each probe link
    pub probe_timeout: Duration,
    pub policy: PrecisionPolicy,
    /// Existing install directories supplied by the user, per package
    pub overrides: BTreeMap<String, PathBuf>,
    /// Vendor-kit roots taken from the environment
    pub env_roots: EnvironmentRoots,
    /// Stop after searching; never fetch or build
    pub search_only: bool,
}

impl InstallOptions {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        InstallOptions {
            work_dir: work_dir.into(),
            jobs: 1,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            policy: PrecisionPolicy::default(),
            overrides: BTreeMap::new(),
            env_roots: EnvironmentRoots::default(),
            search_only: false,
        }
    }

    /// Options taken from a merged configuration.
    pub fn from_config(config: &Config, work_dir: impl Into<PathBuf>) -> Self {
        InstallOptions {
            work_dir: work_dir.into(),
            jobs: config.jobs(),
            timeout: config.timeout(),
            probe_timeout: config.probe_timeout(),
            policy: config.precision_policy(),
            overrides: config.overrides.clone(),
            env_roots: EnvironmentRoots::from_env(&config.search.env_roots),
            search_only: false,
        }
    }

    pub fn with_override(mut self, package: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.overrides.insert(package.into(), dir.into());
        self
    }

    pub fn with_policy(mut self, policy: PrecisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env_roots(mut self, roots: EnvironmentRoots) -> Self {
        self.env_roots = roots;
        self
    }

    pub fn with_search_only(mut self, search_only: bool) -> Self {
        self.search_only = search_only;
        self
    }

    fn log_file(&self, package: &PackageName) -> PathBuf {
        self.work_dir.join("logs").join(format!("{}.log", package))
    }
}

/// User-level abort shared by every worker of a session.
///
/// Cancelling stops packages from starting dependency resolution, fetching
/// or building. A backend process that is already running is left to finish
/// or hit its own timeout.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bookkeeping for the package currently being installed.
struct PackageRun {
    package: PackageName,
    stage: InstallStage,
    attempts: Vec<Attempt>,
    rejected: Vec<String>,
    log_file: Option<PathBuf>,
}

/// Drives packages from recipe to usable install.
pub struct PackageInstaller<'a> {
    book: &'a RecipeBook,
    registry: &'a InstallRegistry,
    prefix: &'a InstallPrefix,
    toolchain: &'a Toolchain,
    runner: Arc<dyn CommandRunner>,
    fetcher: &'a dyn Fetcher,
    options: &'a InstallOptions,
    matcher: LibraryHypothesisMatcher,
    cancel: CancelToken,
    events: EventSink,
}

impl<'a> PackageInstaller<'a> {
    pub fn new(
        book: &'a RecipeBook,
        registry: &'a InstallRegistry,
        prefix: &'a InstallPrefix,
        toolchain: &'a Toolchain,
        runner: Arc<dyn CommandRunner>,
        fetcher: &'a dyn Fetcher,
        options: &'a InstallOptions,
    ) -> Self {
        PackageInstaller {
            book,
            registry,
            prefix,
            toolchain,
            runner,
            fetcher,
            options,
            matcher: LibraryHypothesisMatcher::from_environment(&[]),
            cancel: CancelToken::new(),
            events: discard(),
        }
    }

    /// Use `matcher` for the standard library path.
    pub fn with_matcher(mut self, matcher: LibraryHypothesisMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Make `package` usable, or record why it cannot be.
    ///
    /// Returns the registry entry for the package. A package already
    /// resolved in this run is returned as recorded, without any new fetch,
    /// build or probe work; a package another thread is resolving is waited
    /// for.
    pub fn ensure(&self, package: &Arc<Package>, stack: &mut ResolutionStack) -> Arc<RegistryEntry> {
        let ticket = match self.registry.claim(&package.name) {
            Claim::Resolved(entry) => {
                tracing::debug!("`{}` already resolved in this run", package.name);
                return entry;
            }
            Claim::Owned(ticket) => ticket,
        };

        let mut run = PackageRun {
            package: package.name.clone(),
            stage: InstallStage::NotStarted,
            attempts: Vec::new(),
            rejected: Vec::new(),
            log_file: None,
        };

        let entry = match self.install(package, stack, &mut run) {
            Ok(install) => {
                self.transition(&mut run, InstallStage::Usable);
                RegistryEntry::usable(package.name.clone(), install)
            }
            Err(error) => {
                tracing::debug!("`{}` failed while {}: {}", package.name, run.stage, error);
                let mut failure = FailureRecord::new(error, run.stage);
                failure.attempts = std::mem::take(&mut run.attempts);
                failure.rejected = std::mem::take(&mut run.rejected);
                self.transition(&mut run, InstallStage::Failed);
                RegistryEntry::failed(package.name.clone(), failure)
            }
        };

        let entry = ticket.complete(entry.with_log_file(run.log_file));
        (self.events)(&InstallEvent::PackageFinished {
            package: package.name.clone(),
            usable: entry.is_found(),
            origin: entry.install().map(|i| i.origin),
            error: entry.failure().map(|f| f.error.kind()),
        });
        entry
    }

    fn install(
        &self,
        package: &Arc<Package>,
        stack: &mut ResolutionStack,
        run: &mut PackageRun,
    ) -> Result<UsableInstall, InstallError> {
        let name = &package.name;
        self.check_cancelled(name)?;

        self.transition(run, InstallStage::ResolvingDependencies);
        let resolver = DependencyResolver::new(self.book, self.toolchain);
        stack.push(name.clone());
        let dependencies = resolver.resolve(package, stack, |dep, stack| Ok(self.ensure(dep, stack)));
        stack.pop();
        let dependencies = dependencies?;
        let transitive = transitive_libraries(&dependencies);

        self.transition(run, InstallStage::SearchingExisting);
        if let Some(existing) = self.search_existing(package, &transitive, run)? {
            return Ok(existing);
        }
        if self.options.search_only {
            return Err(InstallError::NotFoundLocally { package: name.clone() });
        }

        self.check_cancelled(name)?;
        self.transition(run, InstallStage::Fetching);
        let source_dir = self.fetcher.fetch(package)?;

        self.check_cancelled(name)?;
        self.transition(run, InstallStage::Building);
        let installed = self.build(package, &source_dir, &dependencies, run)?;

        self.transition(run, InstallStage::Verifying);
        self.verify_built(package, installed, &transitive)
    }

    /// Look for a usable install already on the machine.
    ///
    /// A match whose probe fails is rejected and the search resumes at the
    /// next location, so a stale copy on the system path does not hide a
    /// good one under a vendor root.
    fn search_existing(
        &self,
        package: &Package,
        transitive: &[PathBuf],
        run: &mut PackageRun,
    ) -> Result<Option<UsableInstall>, InstallError> {
        if package.libraries.is_empty() {
            tracing::debug!("`{}` declares no library sets; skipping search", package.name);
            return Ok(None);
        }

        let user_prefix = self
            .options
            .overrides
            .get(package.name.as_str())
            .map(PathBuf::as_path);
        let locations: Vec<SearchLocation> = LibrarySearchPlanner::new(package)
            .with_user_prefix(user_prefix)
            .with_env_roots(&self.options.env_roots)
            .with_install_prefix(self.prefix.root())
            .locations()
            .collect();

        let mut start = 0;
        while start < locations.len() {
            let remaining = &locations[start..];
            let set = match self.matcher.find_match(
                &package.libraries,
                &package.includes,
                remaining.iter().cloned(),
            ) {
                MatchOutcome::Found(set) => set,
                MatchOutcome::NotFound { attempts } => {
                    run.attempts.extend(attempts);
                    return Ok(None);
                }
            };

            match self.probe(package, &set.libraries, transitive)? {
                ProbeVerdict::Verified { precisions } => {
                    tracing::info!("Found `{}` at {}", package.name, set.location);
                    self.claim_existing(package, &set)?;
                    return Ok(Some(UsableInstall {
                        include_dirs: set.include_dirs.clone(),
                        libraries: set,
                        origin: Origin::Existing,
                        precisions,
                        transitive_libraries: transitive.to_vec(),
                    }));
                }
                ProbeVerdict::SymbolMissing { symbol, precision } => {
                    let reason = match precision {
                        Some(p) => format!("{}: `{}` missing in {} precision", set.location, symbol, p),
                        None => format!("{}: `{}` missing", set.location, symbol),
                    };
                    tracing::debug!("rejecting existing `{}` at {}", package.name, reason);
                    run.rejected.push(reason);

                    let matched = remaining
                        .iter()
                        .position(|l| *l == set.location)
                        .unwrap_or(remaining.len());
                    start += matched + 1;
                }
            }
        }

        Ok(None)
    }

    /// Attribute an install left under the shared prefix by an earlier run,
    /// so a later backend cannot overwrite it unnoticed.
    fn claim_existing(&self, package: &Package, set: &ResolvedLibrarySet) -> Result<(), InstallError> {
        let root = self.prefix.root();
        for library in set.libraries.iter().filter(|l| l.starts_with(root)) {
            self.prefix.claim(&package.name, library)?;
        }
        for dir in set.include_dirs.iter().filter(|d| d.starts_with(root)) {
            for header in &package.includes {
                let path = dir.join(header);
                if path.is_file() {
                    self.prefix.claim(&package.name, &path)?;
                }
            }
        }
        Ok(())
    }

    /// Plan and run the backend. Returns the libraries it installed.
    fn build(
        &self,
        package: &Package,
        source_dir: &Path,
        dependencies: &[DependencyResult],
        run: &mut PackageRun,
    ) -> Result<Vec<PathBuf>, InstallError> {
        let name = &package.name;
        let build_dir = self.options.work_dir.join("build").join(name.as_str());
        let log_file = self.options.log_file(name);

        if let Err(e) = write_string(&log_file, "") {
            tracing::warn!("cannot reset build log {}: {:#}", log_file.display(), e);
        }
        run.log_file = Some(log_file.clone());

        ensure_dir(&build_dir).map_err(|e| InstallError::BuildBackendFailure {
            package: name.clone(),
            phase: Phase::Configure.to_string(),
            command: format!("mkdir {}", build_dir.display()),
            exit_status: None,
            log: format!("{:#}", e),
        })?;

        let ctx = PlanContext {
            package,
            source_dir: source_dir.to_path_buf(),
            build_dir,
            prefix: self.prefix.root().to_path_buf(),
            toolchain: self.toolchain,
            dependencies,
            jobs: self.options.jobs,
            timeout: self.options.timeout,
        };
        let plan = BuildBackendAdapter::for_package(package).plan(&ctx);
        tracing::debug!("build plan for `{}`:\n{}", name, plan.describe().join("\n"));

        let installing = AtomicBool::new(false);
        let on_phase = |phase: Phase| {
            if phase == Phase::Install && !installing.swap(true, Ordering::SeqCst) {
                tracing::debug!("`{}`: {} -> {}", name, InstallStage::Building, InstallStage::Installing);
                (self.events)(&InstallEvent::stage(name, InstallStage::Installing));
            }
        };

        let outcome = PlanExecutor::new(self.runner.clone(), self.prefix)
            .with_log_file(Some(log_file))
            .on_phase(&on_phase)
            .execute(&plan);
        if installing.load(Ordering::SeqCst) {
            run.stage = InstallStage::Installing;
        }

        let installed = outcome?.into_result(name, plan.timeout)?;
        tracing::info!("Built `{}`", name);
        Ok(installed)
    }

    /// Locate what the build produced and prove it usable.
    fn verify_built(
        &self,
        package: &Package,
        installed: Vec<PathBuf>,
        transitive: &[PathBuf],
    ) -> Result<UsableInstall, InstallError> {
        let root = self.prefix.root();
        let set = match BuildBackendAdapter::for_package(package).configure_library(root) {
            Some(set) => set,
            None if package.libraries.is_empty() => ResolvedLibrarySet {
                hypothesis: 0,
                libraries: installed,
                location: SearchLocation::under(root, Path::new("lib")),
                include_dirs: existing_dirs(&[root.join("include")]),
            },
            None => {
                let locations = LibrarySearchPlanner::new(package)
                    .without_default()
                    .with_install_prefix(root)
                    .locations();
                match self
                    .matcher
                    .find_match(&package.libraries, &package.includes, locations)
                {
                    MatchOutcome::Found(set) => set,
                    MatchOutcome::NotFound { attempts } => {
                        return Err(InstallError::MissingArtifacts {
                            package: package.name.clone(),
                            attempts: attempts.iter().map(ToString::to_string).collect(),
                        })
                    }
                }
            }
        };

        match self.probe(package, &set.libraries, transitive)? {
            ProbeVerdict::Verified { precisions } => Ok(UsableInstall {
                include_dirs: set.include_dirs.clone(),
                libraries: set,
                origin: Origin::Built,
                precisions,
                transitive_libraries: transitive.to_vec(),
            }),
            ProbeVerdict::SymbolMissing { symbol, precision } => {
                Err(InstallError::SymbolVerificationFailure {
                    package: package.name.clone(),
                    symbol,
                    precision,
                })
            }
        }
    }

    fn probe(
        &self,
        package: &Package,
        libraries: &[PathBuf],
        transitive: &[PathBuf],
    ) -> Result<ProbeVerdict, InstallError> {
        let request = ProbeRequest::for_package(package, libraries, transitive);
        let report = SymbolProbe::new(self.runner.clone(), self.toolchain)
            .with_work_dir(self.options.work_dir.join("probe"))
            .with_timeout(self.options.probe_timeout)
            .verify(&request)
            .map_err(|e| match e {
                ProbeError::Timeout {
                    command,
                    limit,
                    log,
                } => InstallError::Timeout {
                    package: package.name.clone(),
                    command,
                    limit,
                    log,
                },
                other => InstallError::ProbeUnavailable {
                    package: package.name.clone(),
                    message: other.to_string(),
                },
            })?;
        Ok(report.verdict(self.options.policy))
    }

    fn check_cancelled(&self, package: &PackageName) -> Result<(), InstallError> {
        if self.cancel.is_cancelled() {
            return Err(InstallError::Cancelled {
                package: package.clone(),
            });
        }
        Ok(())
    }

    fn transition(&self, run: &mut PackageRun, stage: InstallStage) {
        tracing::debug!("`{}`: {} -> {}", run.package, run.stage, stage);
        run.stage = stage;
        (self.events)(&InstallEvent::stage(&run.package, stage));
    }
}

/// Link-ordered libraries of every dependency, each with its own
/// dependencies after it.
fn transitive_libraries(dependencies: &[DependencyResult]) -> Vec<PathBuf> {
    link_order(
        dependencies
            .iter()
            .filter_map(|d| d.entry.install())
            .flat_map(|install| install.link_libraries()),
    )
}

fn existing_dirs(dirs: &[PathBuf]) -> Vec<PathBuf> {
    dirs.iter().filter(|d| d.is_dir()).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BackendSpec, CustomCommand, CustomSpec};
    use crate::core::Precision;
    use crate::test_support::{
        custom_package, hypotheses, touch_all, CommandExpectation, CommandPattern, MockExecutor,
        MockFetcher, MockProcessOutput,
    };
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Harness {
        _tmp: TempDir,
        root: PathBuf,
        system: PathBuf,
        registry: InstallRegistry,
        prefix: InstallPrefix,
        toolchain: Toolchain,
        exec: Arc<MockExecutor>,
        fetcher: MockFetcher,
        options: InstallOptions,
    }

    impl Harness {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let root = tmp.path().to_path_buf();
            let system = root.join("system/lib");
            std::fs::create_dir_all(&system).unwrap();
            Harness {
                registry: InstallRegistry::new(),
                prefix: InstallPrefix::new(root.join("prefix")),
                toolchain: Toolchain::new().with_cc("/usr/bin/cc"),
                exec: Arc::new(MockExecutor::new()),
                fetcher: MockFetcher::new(),
                options: InstallOptions::new(root.join("work")),
                system,
                root,
                _tmp: tmp,
            }
        }

        fn installer<'a>(&'a self, book: &'a RecipeBook) -> PackageInstaller<'a> {
            PackageInstaller::new(
                book,
                &self.registry,
                &self.prefix,
                &self.toolchain,
                self.exec.clone(),
                &self.fetcher,
                &self.options,
            )
            .with_matcher(LibraryHypothesisMatcher::new(vec![self.system.clone()]))
        }

        fn serve_sources(&self, package: &str) {
            let src = self.root.join("sources").join(package);
            std::fs::create_dir_all(&src).unwrap();
            self.fetcher.serve(package, src);
        }

        fn prefix_lib(&self, name: &str) -> PathBuf {
            self.prefix.root().join("lib").join(name)
        }
    }

    /// A custom package whose single `make install` writes `lib<name>.a`.
    fn buildable(name: &str, deps: &[&str]) -> Package {
        let mut package = custom_package(name, deps);
        package.libraries = hypotheses(&[&[&format!("lib{}.a", name)]]);
        package.backend = BackendSpec::Custom(CustomSpec {
            commands: vec![CustomCommand {
                program: "make".into(),
                args: vec!["install".into(), format!("PKG={}", name)],
                cwd: None,
                env: Default::default(),
            }],
            timeout_secs: None,
        });
        package
    }

    fn expect_install(h: &Harness, name: &str) {
        h.exec.expect_pattern(
            CommandExpectation::new(
                CommandPattern::Exact(format!("make install PKG={}", name)),
                MockProcessOutput::success("installed"),
            )
            .creates(h.prefix_lib(&format!("lib{}.a", name))),
        );
    }

    fn ensure(installer: &PackageInstaller<'_>, book: &RecipeBook, name: &str) -> Arc<RegistryEntry> {
        installer.ensure(book.get(name).unwrap(), &mut ResolutionStack::new())
    }

    #[test]
    fn test_existing_install_skips_fetch() {
        let h = Harness::new();
        touch_all(&h.system, &["libx.a"]);
        let mut x = custom_package("x", &[]);
        x.libraries = hypotheses(&[&["libx.a"]]);
        let book = RecipeBook::from_packages(vec![x]).unwrap();

        let entry = ensure(&h.installer(&book), &book, "x");

        let install = entry.install().expect("x should be usable");
        assert_eq!(install.origin, Origin::Existing);
        assert_eq!(install.libraries.libraries, vec![h.system.join("libx.a")]);
        assert!(h.fetcher.requests().is_empty());
        assert!(h.exec.calls().is_empty());
    }

    #[test]
    fn test_existing_prefix_install_keeps_its_owner() {
        let h = Harness::new();
        touch_all(h.prefix.root(), &["lib/liba.a"]);
        h.serve_sources("b");

        let mut a = custom_package("a", &[]);
        a.libraries = hypotheses(&[&["liba.a"]]);
        // b's install also rewrites the library a left in the prefix.
        h.exec.expect_pattern(
            CommandExpectation::new(
                CommandPattern::Exact("make install PKG=b".into()),
                MockProcessOutput::success("installed"),
            )
            .creates(h.prefix_lib("libb.a"))
            .creates(h.prefix_lib("liba.a")),
        );
        let book = RecipeBook::from_packages(vec![buildable("b", &["a"]), a]).unwrap();

        let entry = ensure(&h.installer(&book), &book, "b");

        let a = h.registry.get("a").unwrap();
        assert_eq!(a.install().unwrap().origin, Origin::Existing);
        assert_eq!(entry.failure().unwrap().error.kind(), "prefix-conflict");
        assert_eq!(h.prefix.owner(&h.prefix_lib("liba.a")).unwrap().as_str(), "a");
    }

    #[test]
    fn test_probe_timeout_is_reported_as_timeout() {
        let h = Harness::new();
        touch_all(&h.system, &["libfoo.a"]);
        let mut foo = custom_package("foo", &[]);
        foo.libraries = hypotheses(&[&["libfoo.a"]]);
        foo.symbols = vec!["foo".into()];
        let book = RecipeBook::from_packages(vec![foo]).unwrap();
        h.exec.expect_contains("probe_foo", MockProcessOutput::timeout());

        let entry = ensure(&h.installer(&book), &book, "foo");

        let failure = entry.failure().unwrap();
        assert_eq!(failure.error.kind(), "timeout");
        assert_eq!(failure.stage, InstallStage::SearchingExisting);
        assert!(h.fetcher.requests().is_empty());
    }

    #[test]
    fn test_user_override_is_searched() {
        let mut h = Harness::new();
        let vendor = h.root.join("vendor");
        touch_all(&vendor, &["lib/libx.a", "include/x.h"]);
        h.options = InstallOptions::new(h.root.join("work")).with_override("x", &vendor);

        let mut x = custom_package("x", &[]);
        x.libraries = hypotheses(&[&["libx.a"]]);
        x.includes = vec!["x.h".into()];
        let book = RecipeBook::from_packages(vec![x]).unwrap();

        let entry = ensure(&h.installer(&book), &book, "x");
        let install = entry.install().unwrap();
        assert_eq!(install.libraries.libraries, vec![vendor.join("lib/libx.a")]);
        assert_eq!(install.include_dirs, vec![vendor.join("include")]);
    }

    #[test]
    fn test_not_found_falls_back_to_build() {
        let h = Harness::new();
        h.serve_sources("z");
        expect_install(&h, "z");
        let book = RecipeBook::from_packages(vec![buildable("z", &[])]).unwrap();

        let entry = ensure(&h.installer(&book), &book, "z");

        let install = entry.install().expect("z should be usable");
        assert_eq!(install.origin, Origin::Built);
        assert_eq!(install.libraries.libraries, vec![h.prefix_lib("libz.a")]);
        assert_eq!(h.fetcher.requests(), vec!["z".to_string()]);
        assert_eq!(h.prefix.owner(&h.prefix_lib("libz.a")).unwrap().as_str(), "z");

        let log = std::fs::read_to_string(entry.log_file.as_ref().unwrap()).unwrap();
        assert!(log.contains("$ make install PKG=z"));
    }

    #[test]
    fn test_registry_hit_is_idempotent() {
        let h = Harness::new();
        h.serve_sources("z");
        expect_install(&h, "z");
        let book = RecipeBook::from_packages(vec![buildable("z", &[])]).unwrap();
        let installer = h.installer(&book);

        let first = ensure(&installer, &book, "z");
        let calls = h.exec.calls().len();
        let second = ensure(&installer, &book, "z");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(h.fetcher.requests().len(), 1);
        assert_eq!(h.exec.calls().len(), calls);
    }

    #[test]
    fn test_symbol_missing_in_one_precision_triggers_build() {
        let h = Harness::new();
        touch_all(&h.system, &["libfoo.a"]);
        h.serve_sources("foo");

        let mut foo = buildable("foo", &[]);
        foo.symbols = vec!["foo_{p}".into()];
        foo.precisions = vec![Precision::Single, Precision::Double];
        let book = RecipeBook::from_packages(vec![foo]).unwrap();

        // The system copy lacks the double-precision routine; the built one has it.
        let system_lib = h.system.join("libfoo.a").display().to_string();
        h.exec.expect_pattern(
            CommandExpectation::new(
                CommandPattern::Regex(format!(r"probe_foo_d .*{}", regex::escape(&system_lib))),
                MockProcessOutput::failure(1, "undefined reference to `foo_d'"),
            )
            .times(1),
        );
        h.exec.expect_contains("probe_foo_", MockProcessOutput::success(""));
        expect_install(&h, "foo");

        let entry = ensure(&h.installer(&book), &book, "foo");

        let install = entry.install().expect("built foo should verify");
        assert_eq!(install.origin, Origin::Built);
        assert_eq!(install.precisions, vec![Precision::Single, Precision::Double]);
        assert_eq!(h.fetcher.requests(), vec!["foo".to_string()]);
        h.exec.verify().unwrap();
    }

    #[test]
    fn test_accept_partial_keeps_existing_install() {
        let mut h = Harness::new();
        touch_all(&h.system, &["libfoo.a"]);
        h.options = InstallOptions::new(h.root.join("work")).with_policy(PrecisionPolicy::AcceptPartial);

        let mut foo = buildable("foo", &[]);
        foo.symbols = vec!["foo_{p}".into()];
        foo.precisions = vec![Precision::Single, Precision::Double];
        let book = RecipeBook::from_packages(vec![foo]).unwrap();

        h.exec.expect_contains("probe_foo_d", MockProcessOutput::failure(1, "undefined"));
        h.exec.expect_contains("probe_foo_s", MockProcessOutput::success(""));

        let entry = ensure(&h.installer(&book), &book, "foo");
        let install = entry.install().unwrap();
        assert_eq!(install.origin, Origin::Existing);
        assert_eq!(install.precisions, vec![Precision::Single]);
    }

    #[test]
    fn test_dependency_failure_propagates() {
        let h = Harness::new();
        h.serve_sources("z");
        h.serve_sources("y");
        h.exec.expect(
            "make install PKG=z",
            MockProcessOutput::failure(2, "error: no rule to make target"),
        );
        let book =
            RecipeBook::from_packages(vec![buildable("y", &["z"]), buildable("z", &[])]).unwrap();

        let entry = ensure(&h.installer(&book), &book, "y");

        let failure = entry.failure().expect("y must fail");
        assert_eq!(failure.stage, InstallStage::ResolvingDependencies);
        match failure.error.as_ref() {
            InstallError::DependencyFailed {
                dependency, cause, ..
            } => {
                assert_eq!(dependency.as_str(), "z");
                assert_eq!(cause.kind(), "build-backend-failure");
                assert!(cause.log().unwrap_or_default().contains("no rule to make target"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!h.registry.found("y"));
        assert_eq!(
            h.registry.get("z").unwrap().failure().unwrap().stage,
            InstallStage::Installing
        );
        assert_eq!(h.fetcher.requests(), vec!["z".to_string()]);
    }

    #[test]
    fn test_dependency_libraries_feed_the_probe() {
        let h = Harness::new();
        touch_all(&h.system, &["libblas.a", "libsolver.a"]);

        let mut blas = custom_package("blas", &[]);
        blas.libraries = hypotheses(&[&["libblas.a"]]);
        let mut solver = custom_package("solver", &["blas"]);
        solver.libraries = hypotheses(&[&["libsolver.a"]]);
        solver.symbols = vec!["solve".into()];
        let book = RecipeBook::from_packages(vec![solver, blas]).unwrap();

        h.exec.expect_contains("probe_solve", MockProcessOutput::success(""));
        let entry = ensure(&h.installer(&book), &book, "solver");

        let install = entry.install().unwrap();
        assert_eq!(
            install.link_libraries(),
            vec![h.system.join("libsolver.a"), h.system.join("libblas.a")]
        );
        let calls = h.exec.calls();
        assert!(calls[0].ends_with(&format!(
            "{} {}",
            h.system.join("libsolver.a").display(),
            h.system.join("libblas.a").display()
        )));
    }

    #[test]
    fn test_build_without_expected_library_fails() {
        let h = Harness::new();
        h.serve_sources("z");
        h.exec.expect("make install PKG=z", MockProcessOutput::success(""));
        let book = RecipeBook::from_packages(vec![buildable("z", &[])]).unwrap();

        let entry = ensure(&h.installer(&book), &book, "z");
        let failure = entry.failure().unwrap();
        assert_eq!(failure.error.kind(), "missing-artifacts");
        assert_eq!(failure.stage, InstallStage::Verifying);
    }

    #[test]
    fn test_unfetchable_package_reports_not_found() {
        let h = Harness::new();
        let book = RecipeBook::from_packages(vec![buildable("z", &[])]).unwrap();

        let entry = ensure(&h.installer(&book), &book, "z");
        let failure = entry.failure().unwrap();
        assert_eq!(failure.error.kind(), "not-found-locally");
        assert_eq!(failure.attempts.len(), 3);
    }

    #[test]
    fn test_search_only_never_fetches() {
        let mut h = Harness::new();
        h.serve_sources("z");
        h.options = InstallOptions::new(h.root.join("work")).with_search_only(true);
        let book = RecipeBook::from_packages(vec![buildable("z", &[])]).unwrap();

        let entry = ensure(&h.installer(&book), &book, "z");
        let failure = entry.failure().unwrap();
        assert_eq!(failure.error.kind(), "not-found-locally");
        assert_eq!(failure.stage, InstallStage::SearchingExisting);
        assert!(!failure.attempts.is_empty());
        assert!(h.fetcher.requests().is_empty());
    }

    #[test]
    fn test_cancelled_before_work() {
        let h = Harness::new();
        h.serve_sources("z");
        let book = RecipeBook::from_packages(vec![buildable("z", &[])]).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let entry = ensure(&h.installer(&book).with_cancel(cancel), &book, "z");
        assert_eq!(entry.failure().unwrap().error.kind(), "cancelled");
        assert!(h.fetcher.requests().is_empty());
    }

    #[test]
    fn test_stage_events_in_order() {
        let h = Harness::new();
        h.serve_sources("z");
        expect_install(&h, "z");
        let book = RecipeBook::from_packages(vec![buildable("z", &[])]).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let installer = h.installer(&book).with_events(Arc::new(move |event: &InstallEvent| {
            if let InstallEvent::StageChanged { stage, .. } = event {
                sink.lock().unwrap().push(*stage);
            }
        }));
        ensure(&installer, &book, "z");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                InstallStage::ResolvingDependencies,
                InstallStage::SearchingExisting,
                InstallStage::Fetching,
                InstallStage::Building,
                InstallStage::Installing,
                InstallStage::Verifying,
                InstallStage::Usable,
            ]
        );
    }
}
