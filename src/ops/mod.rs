//! High-level operations.
//!
//! This module contains the implementation of quay commands: installing a
//! set of packages, locating existing installs and planning a run.

pub mod events;
pub mod installer;
pub mod plan;
pub mod report;
pub mod session;

pub use events::{EventSink, InstallEvent};
pub use installer::{CancelToken, InstallOptions, PackageInstaller};
pub use plan::{plan_install, InstallPlan, PackagePlan};
pub use report::{InstallReport, PackageReport, PackageStatus};
pub use session::InstallSession;
