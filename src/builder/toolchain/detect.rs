//! Minimal toolchain detection.
//!
//! Explicit settings from the `[toolchain]` config section win, then the
//! conventional environment variables (`CC`, `CXX`, `FC`), then a PATH search
//! for common compiler names.

use std::path::{Path, PathBuf};

use crate::util::config::ToolchainSettings;
use crate::util::process::{find_executable, find_tool};

use super::Toolchain;

/// Detect the available toolchain.
///
/// A missing compiler is not an error here; packages that need it fail later
/// with a precise missing-component error.
pub fn detect_toolchain(settings: &ToolchainSettings) -> Toolchain {
    let cc = configured(settings.cc.as_deref())
        .or_else(|| find_tool("CC", &["cc", "gcc", "clang"]));
    let cxx = configured(settings.cxx.as_deref())
        .or_else(|| find_tool("CXX", &["c++", "g++", "clang++"]));
    let fc = configured(settings.fc.as_deref())
        .or_else(|| find_tool("FC", &["gfortran", "ifx", "ifort", "flang"]));

    let toolchain = Toolchain {
        cc,
        cxx,
        fc,
        fortran_mangling: settings.fortran_mangling.unwrap_or_default(),
        cmake: find_executable("cmake"),
        make: find_tool("MAKE", &["make", "gmake"]),
    };

    tracing::debug!(
        "toolchain: cc={:?} cxx={:?} fc={:?} cmake={:?} make={:?}",
        toolchain.cc,
        toolchain.cxx,
        toolchain.fc,
        toolchain.cmake,
        toolchain.make
    );

    toolchain
}

/// Resolve a configured compiler: an existing path is taken as-is, a bare
/// name is looked up in PATH.
fn configured(path: Option<&Path>) -> Option<PathBuf> {
    let path = path?;
    if path.exists() {
        return Some(path.to_path_buf());
    }

    match find_executable(&path.to_string_lossy()) {
        Some(found) => Some(found),
        None => {
            tracing::warn!(
                "configured compiler `{}` not found; falling back to detection",
                path.display()
            );
            None
        }
    }
}
