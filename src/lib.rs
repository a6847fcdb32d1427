//! quay - dependency configuration and build orchestration for external
//! native libraries.
//!
//! For each requested package quay resolves its dependencies, looks for a
//! usable existing install (verified by linking its entry points), and
//! otherwise fetches the pinned sources and builds them into a shared
//! install prefix with the package's declared backend.

pub mod builder;
pub mod core;
pub mod discovery;
pub mod ops;
pub mod probe;
pub mod resolver;
pub mod sources;
pub mod util;

#[cfg(test)]
pub mod test_support;

pub use core::{InstallError, Package, PackageName, RecipeBook};
pub use ops::{InstallReport, InstallSession};
