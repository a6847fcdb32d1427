//! Build backends.
//!
//! A recipe's backend declaration is expanded into a [`BuildPlan`] by the
//! [`BuildBackendAdapter`], then run once by the [`PlanExecutor`]. quay never
//! compiles source trees itself; it decides how to drive CMake, Autotools or
//! a declared command sequence and records what they produced.

pub mod adapter;
pub mod autotools;
pub mod backend;
pub mod cmake;
pub mod custom;
pub mod executor;
pub mod plan;
pub mod toolchain;

pub use adapter::BuildBackendAdapter;
pub use autotools::{AutotoolsSpec, Relocation};
pub use backend::{BackendSpec, DependencyVariable, VariableValue};
pub use cmake::CMakeSpec;
pub use custom::{CustomCommand, CustomSpec};
pub use executor::{BuildOutcome, PlanExecutor};
pub use plan::{BuildPlan, BuildStep, CommandLine, Phase, PlanContext};
pub use toolchain::{detect_toolchain, Language, Toolchain};
