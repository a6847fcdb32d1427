//! Toolchain description for probes and backend invocations.
//!
//! The toolchain is produced by an external detector (or the minimal
//! fallback in [`detect_toolchain`]) and is read-only for the rest of a run.
//! Recipes name the [`Language`]s they need; the resolver checks them before
//! any other work is done for a package.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::probe::FortranMangling;

mod detect;

pub use detect::detect_toolchain;

/// A toolchain component a package can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    #[serde(alias = "c++")]
    Cxx,
    Fortran,
}

impl Language {
    /// Environment variable conventionally naming the compiler.
    pub fn env_var(&self) -> &'static str {
        match self {
            Language::C => "CC",
            Language::Cxx => "CXX",
            Language::Fortran => "FC",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::C => write!(f, "C"),
            Language::Cxx => write!(f, "C++"),
            Language::Fortran => write!(f, "Fortran"),
        }
    }
}

/// Compilers and build tools available to this run.
#[derive(Debug, Clone, Default)]
pub struct Toolchain {
    /// C compiler
    pub cc: Option<PathBuf>,
    /// C++ compiler
    pub cxx: Option<PathBuf>,
    /// Fortran compiler
    pub fc: Option<PathBuf>,
    /// Symbol naming convention of the Fortran compiler
    pub fortran_mangling: FortranMangling,
    /// `cmake` executable
    pub cmake: Option<PathBuf>,
    /// `make` executable
    pub make: Option<PathBuf>,
}

impl Toolchain {
    /// Create an empty toolchain.
    pub fn new() -> Self {
        Toolchain::default()
    }

    /// Set the C compiler.
    pub fn with_cc(mut self, cc: impl Into<PathBuf>) -> Self {
        self.cc = Some(cc.into());
        self
    }

    /// Set the Fortran compiler.
    pub fn with_fc(mut self, fc: impl Into<PathBuf>) -> Self {
        self.fc = Some(fc.into());
        self
    }

    /// Set the Fortran mangling convention.
    pub fn with_fortran_mangling(mut self, mangling: FortranMangling) -> Self {
        self.fortran_mangling = mangling;
        self
    }

    /// Set the `cmake` executable.
    pub fn with_cmake(mut self, cmake: impl Into<PathBuf>) -> Self {
        self.cmake = Some(cmake.into());
        self
    }

    /// Compiler for a language, if one is available.
    pub fn compiler(&self, language: Language) -> Option<&Path> {
        match language {
            Language::C => self.cc.as_deref(),
            Language::Cxx => self.cxx.as_deref(),
            Language::Fortran => self.fc.as_deref(),
        }
    }

    /// Whether a compiler for `language` is available.
    pub fn has(&self, language: Language) -> bool {
        self.compiler(language).is_some()
    }

    /// Languages from `required` that this toolchain cannot serve.
    pub fn missing(&self, required: &[Language]) -> Vec<Language> {
        required.iter().copied().filter(|l| !self.has(*l)).collect()
    }

    /// Driver used to link symbol probes.
    ///
    /// Fortran symbols are linked with the Fortran compiler when one is
    /// available so its runtime libraries come along; everything else uses
    /// the C compiler.
    pub fn probe_linker(&self, fortran: bool) -> Option<&Path> {
        if fortran {
            if let Some(fc) = self.fc.as_deref() {
                return Some(fc);
            }
        }
        self.cc.as_deref()
    }
}
