//! Uniform entry point over the build backends.

use std::path::Path;

use crate::core::Package;
use crate::discovery::ResolvedLibrarySet;

use super::backend::BackendSpec;
use super::plan::{BuildPlan, PlanContext};
use super::{autotools, cmake, custom};

/// Translates a recipe into a [`BuildPlan`] for its backend.
#[derive(Debug, Clone, Copy)]
pub struct BuildBackendAdapter<'a> {
    package: &'a Package,
}

impl<'a> BuildBackendAdapter<'a> {
    pub fn for_package(package: &'a Package) -> Self {
        BuildBackendAdapter { package }
    }

    /// Backend kind name.
    pub fn kind(&self) -> &'static str {
        self.package.backend.kind()
    }

    /// Expand the recipe into concrete steps.
    pub fn plan(&self, ctx: &PlanContext<'_>) -> BuildPlan {
        tracing::debug!("planning {} build of `{}`", self.kind(), self.package.name);

        let (steps, timeout) = match self.package.backend {
            BackendSpec::Cmake(ref spec) => (cmake::plan(spec, ctx), ctx.timeout),
            BackendSpec::Autotools(ref spec) => (autotools::plan(spec, ctx), ctx.timeout),
            BackendSpec::Custom(ref spec) => (custom::plan(spec, ctx), spec.timeout(ctx.timeout)),
        };

        BuildPlan {
            package: self.package.name.clone(),
            backend: self.kind(),
            steps,
            timeout,
        }
    }

    /// Library set a backend vouches for without searching the prefix.
    ///
    /// Only relocated Autotools packages do this; everything else is located
    /// by matching the recipe's hypotheses against the prefix after install.
    pub fn configure_library(&self, prefix: &Path) -> Option<ResolvedLibrarySet> {
        match self.package.backend {
            BackendSpec::Autotools(ref spec) => autotools::configure_library(spec, prefix),
            BackendSpec::Cmake(_) | BackendSpec::Custom(_) => None,
        }
    }
}
