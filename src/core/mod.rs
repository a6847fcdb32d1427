//! Core data structures for quay.
//!
//! This module contains the foundational types used throughout quay:
//! - Package recipes and the recipe book
//! - Install failure kinds and stages
//! - The per-run install registry
//! - The shared install prefix and its attribution ledger

pub mod error;
pub mod package;
pub mod prefix;
pub mod recipe;
pub mod registry;

pub use error::{InstallError, InstallStage};
pub use package::{FetchLocation, LibraryHypothesis, Package, PackageName, Precision, VersionPin};
pub use prefix::InstallPrefix;
pub use recipe::{RecipeBook, RecipeError};
pub use registry::{
    link_order, BuildTicket, Claim, EntryStatus, FailureRecord, InstallRegistry, Origin,
    RegistryEntry, UsableInstall,
};
