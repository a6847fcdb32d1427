//! One install run.
//!
//! The session owns the run's registry and install prefix. It validates the
//! whole dependency graph of the requested roots before any work starts,
//! then installs the roots on a rayon pool: independent subtrees proceed in
//! parallel while the registry guarantees a single attempt per package.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use crate::builder::Toolchain;
use crate::core::{InstallError, InstallPrefix, InstallRegistry, PackageName, RecipeBook};
use crate::discovery::LibraryHypothesisMatcher;
use crate::resolver::{DependencyGraph, ResolutionStack};
use crate::sources::Fetcher;
use crate::util::process::CommandRunner;

use super::events::{discard, EventSink, InstallEvent};
use super::installer::{CancelToken, InstallOptions, PackageInstaller};
use super::report::InstallReport;

/// Owner of a single run.
pub struct InstallSession<'a> {
    book: &'a RecipeBook,
    toolchain: Toolchain,
    prefix: InstallPrefix,
    registry: InstallRegistry,
    runner: Arc<dyn CommandRunner>,
    fetcher: Box<dyn Fetcher + 'a>,
    options: InstallOptions,
    matcher: LibraryHypothesisMatcher,
    cancel: CancelToken,
    events: EventSink,
}

impl<'a> InstallSession<'a> {
    pub fn new(
        book: &'a RecipeBook,
        toolchain: Toolchain,
        prefix: InstallPrefix,
        runner: Arc<dyn CommandRunner>,
        fetcher: Box<dyn Fetcher + 'a>,
        options: InstallOptions,
    ) -> Self {
        InstallSession {
            book,
            toolchain,
            prefix,
            registry: InstallRegistry::new(),
            runner,
            fetcher,
            options,
            matcher: LibraryHypothesisMatcher::from_environment(&[]),
            cancel: CancelToken::new(),
            events: discard(),
        }
    }

    pub fn with_matcher(mut self, matcher: LibraryHypothesisMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Token that aborts the run when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn registry(&self) -> &InstallRegistry {
        &self.registry
    }

    pub fn prefix(&self) -> &InstallPrefix {
        &self.prefix
    }

    /// Install `roots` and everything they depend on.
    ///
    /// Fails up front on an unknown package or a dependency cycle; individual
    /// package failures are recorded in the report instead.
    pub fn run(&self, roots: &[PackageName]) -> Result<InstallReport, InstallError> {
        let started = Instant::now();

        let graph = DependencyGraph::from_roots(self.book, roots)?;
        graph.check_acyclic()?;
        tracing::debug!(
            "installing {} package(s) for {}",
            graph.len(),
            roots
                .iter()
                .map(PackageName::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let packages = roots
            .iter()
            .map(|name| {
                self.book
                    .get(name.as_str())
                    .cloned()
                    .ok_or_else(|| InstallError::UnknownPackage {
                        name: name.clone(),
                        referenced_by: None,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let installer = PackageInstaller::new(
            self.book,
            &self.registry,
            &self.prefix,
            &self.toolchain,
            self.runner.clone(),
            self.fetcher.as_ref(),
            &self.options,
        )
        .with_matcher(self.matcher.clone())
        .with_cancel(self.cancel.clone())
        .with_events(self.events.clone());

        let install_all = || {
            packages.par_iter().for_each(|package| {
                installer.ensure(package, &mut ResolutionStack::new());
            })
        };

        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .build()
        {
            Ok(pool) => pool.install(install_all),
            Err(e) => {
                tracing::warn!("cannot start worker pool, installing sequentially: {}", e);
                for package in &packages {
                    installer.ensure(package, &mut ResolutionStack::new());
                }
            }
        }

        let report = InstallReport::from_registry(&self.registry, roots, &graph.build_order());
        (self.events)(&InstallEvent::SessionFinished {
            success: report.success(),
            duration_ms: started.elapsed().as_millis() as u64,
            packages: report.packages.len(),
        });
        Ok(report)
    }
}
