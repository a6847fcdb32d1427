//! End-of-run report.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;

use crate::core::{
    EntryStatus, FailureRecord, InstallRegistry, InstallStage, Origin, PackageName, Precision,
    RegistryEntry,
};
use crate::util::diagnostic::Diagnostic;

/// Final state of one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageStatus {
    Usable,
    Failed,
}

/// Failure summary for machine-readable output.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub stage: InstallStage,
    pub message: String,
    /// (location, hypothesis) pairs tried and rejected installs
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

/// What a run produced for one package.
#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub name: PackageName,
    /// Whether the package was asked for rather than pulled in
    pub requested: bool,
    pub status: PackageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    /// Own libraries followed by its dependencies', in link order
    pub libraries: Vec<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub precisions: Vec<Precision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    #[serde(skip)]
    failure: Option<FailureRecord>,
}

impl PackageReport {
    fn from_entry(entry: &RegistryEntry, requested: bool) -> Self {
        let mut report = PackageReport {
            name: entry.package.clone(),
            requested,
            status: PackageStatus::Usable,
            origin: None,
            libraries: Vec::new(),
            include_dirs: Vec::new(),
            precisions: Vec::new(),
            log_file: entry.log_file.clone(),
            error: None,
            failure: None,
        };

        match entry.status {
            EntryStatus::Usable(ref install) => {
                report.origin = Some(install.origin);
                report.libraries = install.link_libraries();
                report.include_dirs = install.include_dirs.clone();
                report.precisions = install.precisions.clone();
            }
            EntryStatus::Failed(ref failure) => {
                let mut context: Vec<String> = failure
                    .rejected
                    .iter()
                    .map(|r| format!("rejected existing install: {}", r))
                    .collect();
                context.extend(failure.attempts.iter().map(|a| format!("tried {}", a)));

                report.status = PackageStatus::Failed;
                report.error = Some(ErrorReport {
                    kind: failure.error.kind(),
                    stage: failure.stage,
                    message: failure.error.to_string(),
                    context,
                    log: failure.error.log().map(str::to_string),
                });
                report.failure = Some(failure.clone());
            }
        }
        report
    }

    pub fn is_usable(&self) -> bool {
        self.status == PackageStatus::Usable
    }

    /// Full diagnostic for a failed package.
    pub fn diagnostic(&self) -> Option<Diagnostic> {
        let failure = self.failure.as_ref()?;
        let mut diag = failure.to_diagnostic();
        if let Some(ref path) = self.log_file {
            diag = diag.with_location(path.clone());
        }
        Some(diag)
    }
}

/// Per-package outcome of a run, dependencies first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    pub packages: Vec<PackageReport>,
}

impl InstallReport {
    /// Collect the registry's entries in `order`; entries outside it follow
    /// in name order.
    pub fn from_registry(
        registry: &InstallRegistry,
        requested: &[PackageName],
        order: &[PackageName],
    ) -> Self {
        let mut entries = registry.entries();
        entries.sort_by_key(|e| {
            order
                .iter()
                .position(|n| *n == e.package)
                .unwrap_or(order.len())
        });

        InstallReport {
            packages: entries
                .iter()
                .map(|e| PackageReport::from_entry(e, requested.contains(&e.package)))
                .collect(),
        }
    }

    /// Whether every package ended up usable.
    pub fn success(&self) -> bool {
        self.packages.iter().all(PackageReport::is_usable)
    }

    pub fn package(&self, name: &str) -> Option<&PackageReport> {
        self.packages.iter().find(|p| p.name.as_str() == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PackageReport> {
        self.packages.iter().filter(|p| !p.is_usable())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Render a summary table.
    pub fn render_table(&self) -> String {
        let width = self
            .packages
            .iter()
            .map(|p| p.name.as_str().len())
            .max()
            .unwrap_or(0)
            .max("package".len());

        let mut out = String::new();
        let _ = writeln!(out, "{:<width$}  {:<8}  libraries", "package", "status");
        for package in &self.packages {
            let status = match (package.status, package.origin) {
                (PackageStatus::Usable, Some(Origin::Existing)) => "existing",
                (PackageStatus::Usable, _) => "built",
                (PackageStatus::Failed, _) => "failed",
            };
            let detail = match package.error {
                Some(ref error) => format!("{} ({})", error.kind, error.stage),
                None => package
                    .libraries
                    .iter()
                    .map(|l| l.display().to_string())
                    .collect::<Vec<_>>()
                    .join(" "),
            };
            let _ = writeln!(out, "{:<width$}  {:<8}  {}", package.name.as_str(), status, detail);
        }
        out
    }
}
