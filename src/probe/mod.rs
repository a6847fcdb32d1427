//! Symbol probing.
//!
//! File presence alone does not prove a library set is usable: a stale or
//! ABI-mismatched archive can sit exactly where a hypothesis expects it. The
//! probe links a minimal program referencing each required entry point
//! against the resolved set plus the libraries of the package's dependencies.
//!
//! Symbols are checked conjunctively within a precision and independently
//! across precisions, so a hole in the single-precision routines never marks
//! the double-precision build as broken.

mod mangle;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::builder::toolchain::Toolchain;
use crate::core::{Package, Precision};
use crate::util::process::{CommandRunner, ProcessBuilder};

pub use mangle::{expand_precision, symbol_name, FortranMangling, PRECISION_PLACEHOLDER};

/// Which precision coverage makes an install acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrecisionPolicy {
    /// Every declared precision must verify.
    #[default]
    RequireAll,
    /// At least one declared precision must verify.
    AcceptPartial,
}

/// Errors that prevent a probe from running at all.
///
/// A symbol that fails to link is not an error; it is reported in the
/// [`ProbeReport`].
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no {0} driver available to link symbol probes")]
    NoLinker(&'static str),

    #[error("failed to prepare probe directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe link `{command}` timed out after {}s", .limit.as_secs())]
    Timeout {
        command: String,
        limit: Duration,
        log: String,
    },

    #[error("failed to run probe linker `{program}`: {source:#}")]
    Spawn {
        program: String,
        #[source]
        source: anyhow::Error,
    },
}

/// What to verify.
#[derive(Debug, Clone, Copy)]
pub struct ProbeRequest<'a> {
    /// The resolved library set, in link order
    pub libraries: &'a [PathBuf],
    /// Libraries of the package's dependencies, in link order
    pub transitive: &'a [PathBuf],
    /// Symbol templates, possibly containing the precision placeholder
    pub symbols: &'a [String],
    /// Whether the symbols follow the Fortran naming convention
    pub fortran: bool,
    /// Precisions to probe; empty means probe the templates once as written
    pub precisions: &'a [Precision],
}

impl<'a> ProbeRequest<'a> {
    /// Request the checks a package's recipe declares.
    pub fn for_package(
        package: &'a Package,
        libraries: &'a [PathBuf],
        transitive: &'a [PathBuf],
    ) -> Self {
        ProbeRequest {
            libraries,
            transitive,
            symbols: &package.symbols,
            fortran: package.fortran_symbols,
            precisions: &package.precisions,
        }
    }
}

/// Result of probing one precision variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrecisionReport {
    /// The precision, or None when the package declares no precisions
    pub precision: Option<Precision>,
    /// Link-level names that failed to resolve
    pub missing: Vec<String>,
}

impl PrecisionReport {
    /// Whether every symbol resolved for this precision.
    pub fn verified(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Per-precision outcome of a probe run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub precisions: Vec<PrecisionReport>,
}

/// Acceptance decision for a probe report under a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// The install is usable for these precisions.
    Verified { precisions: Vec<Precision> },
    /// A required symbol did not resolve.
    SymbolMissing {
        symbol: String,
        precision: Option<Precision>,
    },
}

impl ProbeReport {
    /// Decide whether the probed install is acceptable.
    pub fn verdict(&self, policy: PrecisionPolicy) -> ProbeVerdict {
        let first_failure = self.precisions.iter().find(|r| !r.verified());

        let verified: Vec<Precision> = self
            .precisions
            .iter()
            .filter(|r| r.verified())
            .filter_map(|r| r.precision)
            .collect();

        let acceptable = match policy {
            PrecisionPolicy::RequireAll => first_failure.is_none(),
            PrecisionPolicy::AcceptPartial => {
                first_failure.is_none() || self.precisions.iter().any(|r| r.verified())
            }
        };

        match first_failure {
            Some(report) if !acceptable => ProbeVerdict::SymbolMissing {
                symbol: report.missing[0].clone(),
                precision: report.precision,
            },
            _ => ProbeVerdict::Verified {
                precisions: verified,
            },
        }
    }
}

/// Links minimal probe programs to confirm exported symbols.
pub struct SymbolProbe {
    runner: Arc<dyn CommandRunner>,
    cc: Option<PathBuf>,
    fc: Option<PathBuf>,
    mangling: FortranMangling,
    work_dir: Option<PathBuf>,
    timeout: Duration,
}

impl SymbolProbe {
    /// Create a probe using the toolchain's compilers.
    pub fn new(runner: Arc<dyn CommandRunner>, toolchain: &Toolchain) -> Self {
        SymbolProbe {
            runner,
            cc: toolchain.cc.clone(),
            fc: toolchain.fc.clone(),
            mangling: toolchain.fortran_mangling,
            work_dir: None,
            timeout: Duration::from_secs(crate::util::config::DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }

    /// Create scratch directories under `dir` instead of the system temp dir.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Bound each probe link by a timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn linker(&self, fortran: bool) -> Result<&Path, ProbeError> {
        if fortran {
            if let Some(fc) = self.fc.as_deref() {
                return Ok(fc);
            }
        }
        self.cc
            .as_deref()
            .ok_or(ProbeError::NoLinker(if fortran { "Fortran or C" } else { "C" }))
    }

    /// Probe every (precision, symbol) pair of the request.
    pub fn verify(&self, request: &ProbeRequest<'_>) -> Result<ProbeReport, ProbeError> {
        let precisions: Vec<Option<Precision>> = if request.precisions.is_empty() {
            vec![None]
        } else {
            request.precisions.iter().copied().map(Some).collect()
        };

        if request.symbols.is_empty() {
            return Ok(ProbeReport {
                precisions: precisions
                    .into_iter()
                    .map(|precision| PrecisionReport {
                        precision,
                        missing: Vec::new(),
                    })
                    .collect(),
            });
        }

        let linker = self.linker(request.fortran)?;
        let scratch = match self.work_dir {
            Some(ref dir) => {
                std::fs::create_dir_all(dir)?;
                tempfile::Builder::new().prefix("probe-").tempdir_in(dir)?
            }
            None => tempfile::Builder::new().prefix("quay-probe-").tempdir()?,
        };

        let mangling = request.fortran.then_some(self.mangling);
        let mut linked: HashMap<String, bool> = HashMap::new();
        let mut reports = Vec::with_capacity(precisions.len());

        for precision in precisions {
            let mut missing = Vec::new();
            for template in request.symbols {
                let symbol = symbol_name(template, precision, mangling);
                let ok = match linked.get(&symbol) {
                    Some(ok) => *ok,
                    None => {
                        let ok = self.link_one(linker, scratch.path(), &symbol, request)?;
                        linked.insert(symbol.clone(), ok);
                        ok
                    }
                };
                if !ok {
                    missing.push(symbol);
                }
            }

            match precision {
                Some(p) if missing.is_empty() => tracing::debug!("probe: {} verified", p),
                Some(p) => tracing::debug!("probe: {} missing {}", p, missing.join(", ")),
                None if !missing.is_empty() => {
                    tracing::debug!("probe: missing {}", missing.join(", "))
                }
                None => {}
            }

            reports.push(PrecisionReport { precision, missing });
        }

        Ok(ProbeReport {
            precisions: reports,
        })
    }

    fn link_one(
        &self,
        linker: &Path,
        scratch: &Path,
        symbol: &str,
        request: &ProbeRequest<'_>,
    ) -> Result<bool, ProbeError> {
        let source = scratch.join(format!("probe_{}.c", symbol));
        let output = scratch.join(format!("probe_{}", symbol));
        std::fs::write(
            &source,
            format!(
                "char {sym}();\nint main(void) {{ return (int) {sym}(); }}\n",
                sym = symbol
            ),
        )?;

        let cmd = ProcessBuilder::new(linker)
            .arg(&source)
            .arg("-o")
            .arg(&output)
            .args(request.libraries)
            .args(request.transitive)
            .cwd(scratch)
            .timeout(self.timeout);

        let result = self.runner.run(&cmd).map_err(|e| ProbeError::Spawn {
            program: linker.display().to_string(),
            source: e,
        })?;

        if result.timed_out {
            tracing::warn!("probe link for `{}` timed out", symbol);
            return Err(ProbeError::Timeout {
                command: cmd.display_command(),
                limit: self.timeout,
                log: result.combined(),
            });
        }

        Ok(result.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockExecutor, MockProcessOutput};

    fn toolchain() -> Toolchain {
        Toolchain::new()
            .with_cc("/usr/bin/cc")
            .with_fc("/usr/bin/gfortran")
    }

    #[test]
    fn test_verdict_require_all() {
        let report = ProbeReport {
            precisions: vec![
                PrecisionReport {
                    precision: Some(Precision::Single),
                    missing: vec![],
                },
                PrecisionReport {
                    precision: Some(Precision::Double),
                    missing: vec!["foo".into()],
                },
            ],
        };

        assert_eq!(
            report.verdict(PrecisionPolicy::RequireAll),
            ProbeVerdict::SymbolMissing {
                symbol: "foo".into(),
                precision: Some(Precision::Double),
            }
        );
        assert_eq!(
            report.verdict(PrecisionPolicy::AcceptPartial),
            ProbeVerdict::Verified {
                precisions: vec![Precision::Single]
            }
        );
    }

    #[test]
    fn test_precisions_are_independent() {
        let exec = Arc::new(MockExecutor::new());
        exec.expect_contains("probe_foo_d", MockProcessOutput::failure(1, "undefined reference to `foo_d'"));
        exec.set_default(MockProcessOutput::success(""));

        let probe = SymbolProbe::new(exec.clone(), &toolchain());
        let libs = vec![PathBuf::from("/opt/x/lib/libx.a")];
        let symbols = vec!["foo_{p}".to_string(), "bar".to_string()];
        let request = ProbeRequest {
            libraries: &libs,
            transitive: &[],
            symbols: &symbols,
            fortran: false,
            precisions: &[Precision::Single, Precision::Double],
        };

        let report = probe.verify(&request).unwrap();
        assert!(report.precisions[0].verified());
        assert_eq!(report.precisions[1].missing, vec!["foo_d".to_string()]);

        // `bar` has no placeholder and is linked once for both precisions.
        assert_eq!(exec.calls_matching("probe_bar"), 1);
    }

    #[test]
    fn test_fortran_symbols_use_fortran_driver() {
        let exec = Arc::new(MockExecutor::new());
        exec.set_default(MockProcessOutput::success(""));

        let probe = SymbolProbe::new(exec.clone(), &toolchain());
        let libs = vec![PathBuf::from("/opt/scalapack/lib/libscalapack.a")];
        let deps = vec![PathBuf::from("/usr/lib/liblapack.a")];
        let symbols = vec!["p{p}sytrd".to_string()];
        let request = ProbeRequest {
            libraries: &libs,
            transitive: &deps,
            symbols: &symbols,
            fortran: true,
            precisions: &[Precision::Double],
        };

        let report = probe.verify(&request).unwrap();
        assert_eq!(
            report.verdict(PrecisionPolicy::RequireAll),
            ProbeVerdict::Verified {
                precisions: vec![Precision::Double]
            }
        );

        let calls = exec.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("/usr/bin/gfortran"));
        assert!(calls[0].contains("probe_pdsytrd_.c"));
        assert!(calls[0].ends_with("/opt/scalapack/lib/libscalapack.a /usr/lib/liblapack.a"));
    }

    #[test]
    fn test_toolchain_mangling_reaches_probe() {
        let exec = Arc::new(MockExecutor::new());
        exec.set_default(MockProcessOutput::success(""));

        let toolchain = toolchain().with_fortran_mangling(FortranMangling::Uppercase);
        let probe = SymbolProbe::new(exec.clone(), &toolchain);
        let libs = vec![PathBuf::from("/opt/scalapack/lib/libscalapack.a")];
        let symbols = vec!["p{p}sytrd".to_string()];
        let request = ProbeRequest {
            libraries: &libs,
            transitive: &[],
            symbols: &symbols,
            fortran: true,
            precisions: &[Precision::Single],
        };

        probe.verify(&request).unwrap();
        assert_eq!(exec.calls_matching("probe_PSSYTRD"), 1);
    }

    #[test]
    fn test_link_timeout_is_not_a_missing_symbol() {
        let exec = Arc::new(MockExecutor::new());
        exec.expect_contains("probe_foo", MockProcessOutput::timeout());

        let probe = SymbolProbe::new(exec.clone(), &toolchain()).with_timeout(Duration::from_secs(7));
        let libs = vec![PathBuf::from("/opt/foo/lib/libfoo.a")];
        let symbols = vec!["foo".to_string()];
        let request = ProbeRequest {
            libraries: &libs,
            transitive: &[],
            symbols: &symbols,
            fortran: false,
            precisions: &[],
        };

        match probe.verify(&request) {
            Err(ProbeError::Timeout { command, limit, .. }) => {
                assert!(command.contains("probe_foo.c"));
                assert_eq!(limit, Duration::from_secs(7));
            }
            other => panic!("expected a timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_no_symbols_verifies_without_linking() {
        let exec = Arc::new(MockExecutor::new());
        let probe = SymbolProbe::new(exec.clone(), &Toolchain::new());

        let report = probe
            .verify(&ProbeRequest {
                libraries: &[],
                transitive: &[],
                symbols: &[],
                fortran: false,
                precisions: &[],
            })
            .unwrap();

        assert_eq!(
            report.verdict(PrecisionPolicy::RequireAll),
            ProbeVerdict::Verified { precisions: vec![] }
        );
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn test_missing_linker_is_an_error() {
        let exec = Arc::new(MockExecutor::new());
        let probe = SymbolProbe::new(exec, &Toolchain::new());
        let symbols = vec!["foo".to_string()];

        let err = probe
            .verify(&ProbeRequest {
                libraries: &[],
                transitive: &[],
                symbols: &symbols,
                fortran: false,
                precisions: &[],
            })
            .unwrap_err();
        assert!(matches!(err, ProbeError::NoLinker(_)));
    }
}
