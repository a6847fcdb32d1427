//! Locating existing installs.
//!
//! [`LibrarySearchPlanner`] enumerates where a package might already live;
//! [`LibraryHypothesisMatcher`] walks those locations and the package's
//! library hypotheses to find the first complete match.

pub mod matcher;
pub mod planner;

pub use matcher::{Attempt, LibraryHypothesisMatcher, MatchOutcome, ResolvedLibrarySet};
pub use planner::{EnvironmentRoots, LibrarySearchPlanner, SearchLocation};
