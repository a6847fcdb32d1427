//! Configuration file support for quay.
//!
//! Two locations are read:
//! - Global: `~/.quay/config.toml` - user-wide defaults
//! - Project: `.quay/config.toml` - project-specific overrides
//!
//! Project config takes precedence over global config, field by field.
//! Command-line flags take precedence over both.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::probe::{FortranMangling, PrecisionPolicy};

/// Default timeout for a single backend invocation.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3000;

/// Default timeout for a single symbol-probe link.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 120;

/// quay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Install settings
    pub install: InstallConfig,

    /// Library search settings
    pub search: SearchConfig,

    /// Symbol probe settings
    pub probe: ProbeConfig,

    /// Toolchain overrides
    pub toolchain: ToolchainSettings,

    /// Existing install directories, keyed by package name
    pub overrides: BTreeMap<String, PathBuf>,
}

/// Install-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InstallConfig {
    /// Shared install prefix (contains `include/` and `lib/`)
    pub prefix: Option<PathBuf>,

    /// Working directory for sources, build trees and logs
    pub work_dir: Option<PathBuf>,

    /// Parallel jobs for builds and independent packages
    pub jobs: Option<usize>,

    /// Timeout for one backend invocation, in seconds
    pub timeout_secs: Option<u64>,

    /// Program used to elevate prefix mutations (e.g. `sudo`)
    pub install_sudo: Option<String>,
}

/// Library search configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SearchConfig {
    /// Directories standing in for the standard library path
    pub system_lib_dirs: Vec<PathBuf>,

    /// Environment variables naming vendor-kit roots (e.g. `MKLROOT`)
    pub env_roots: Vec<String>,
}

/// Symbol probe configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProbeConfig {
    /// Whether every declared precision must verify
    pub policy: Option<PrecisionPolicy>,

    /// Timeout for one probe link, in seconds
    pub timeout_secs: Option<u64>,
}

/// Toolchain overrides handed to the toolchain description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ToolchainSettings {
    /// Path to the C compiler
    pub cc: Option<PathBuf>,

    /// Path to the C++ compiler
    pub cxx: Option<PathBuf>,

    /// Path to the Fortran compiler
    pub fc: Option<PathBuf>,

    /// Name-mangling convention of the Fortran compiler
    pub fortran_mangling: Option<FortranMangling>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Load configuration, falling back to defaults if the file is absent or broken.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        let Config {
            install,
            search,
            probe,
            toolchain,
            overrides,
        } = other;

        if install.prefix.is_some() {
            self.install.prefix = install.prefix;
        }
        if install.work_dir.is_some() {
            self.install.work_dir = install.work_dir;
        }
        if install.jobs.is_some() {
            self.install.jobs = install.jobs;
        }
        if install.timeout_secs.is_some() {
            self.install.timeout_secs = install.timeout_secs;
        }
        if install.install_sudo.is_some() {
            self.install.install_sudo = install.install_sudo;
        }

        if !search.system_lib_dirs.is_empty() {
            self.search.system_lib_dirs = search.system_lib_dirs;
        }
        if !search.env_roots.is_empty() {
            self.search.env_roots = search.env_roots;
        }

        if probe.policy.is_some() {
            self.probe.policy = probe.policy;
        }
        if probe.timeout_secs.is_some() {
            self.probe.timeout_secs = probe.timeout_secs;
        }

        if toolchain.cc.is_some() {
            self.toolchain.cc = toolchain.cc;
        }
        if toolchain.cxx.is_some() {
            self.toolchain.cxx = toolchain.cxx;
        }
        if toolchain.fc.is_some() {
            self.toolchain.fc = toolchain.fc;
        }
        if toolchain.fortran_mangling.is_some() {
            self.toolchain.fortran_mangling = toolchain.fortran_mangling;
        }

        self.overrides.extend(overrides);
    }

    /// Timeout for one backend invocation.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.install.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Timeout for one probe link.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_secs.unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS))
    }

    /// Parallel job count, defaulting to the machine's parallelism.
    pub fn jobs(&self) -> usize {
        self.install.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Precision policy, defaulting to requiring every declared precision.
    pub fn precision_policy(&self) -> PrecisionPolicy {
        self.probe.policy.unwrap_or_default()
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.quay/config.toml)
/// 2. Global config (~/.quay/config.toml)
/// 3. Defaults
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Config {
    let mut config = Config::default();

    if let Some(global_path) = global_path {
        if global_path.exists() {
            config.merge(Config::load_or_default(global_path));
        }
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}

/// Get the global quay config directory (~/.quay).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".quay"))
}

/// Get the global config path (~/.quay/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the project config path (.quay/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".quay").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [install]
            prefix = "/opt/deps"
            jobs = 8
            install-sudo = "sudo"

            [search]
            env-roots = ["MKLROOT"]

            [probe]
            policy = "accept-partial"

            [toolchain]
            fortran-mangling = "underscore"

            [overrides]
            scalapack = "/opt/scalapack"
            "#,
        )
        .unwrap();

        assert_eq!(config.install.prefix, Some(PathBuf::from("/opt/deps")));
        assert_eq!(config.jobs(), 8);
        assert_eq!(config.install.install_sudo.as_deref(), Some("sudo"));
        assert_eq!(config.search.env_roots, vec!["MKLROOT".to_string()]);
        assert_eq!(config.precision_policy(), PrecisionPolicy::AcceptPartial);
        assert_eq!(
            config.toolchain.fortran_mangling,
            Some(FortranMangling::Underscore)
        );
        assert_eq!(
            config.overrides.get("scalapack"),
            Some(&PathBuf::from("/opt/scalapack"))
        );
    }

    #[test]
    fn test_project_overrides_global() {
        let tmp = TempDir::new().unwrap();
        let global = tmp.path().join("global.toml");
        let project = tmp.path().join("project.toml");

        std::fs::write(
            &global,
            "[install]\nprefix = \"/global\"\ntimeout-secs = 10\n",
        )
        .unwrap();
        std::fs::write(&project, "[install]\nprefix = \"/project\"\n").unwrap();

        let config = load_config(Some(&global), &project);
        assert_eq!(config.install.prefix, Some(PathBuf::from("/project")));
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.precision_policy(), PrecisionPolicy::RequireAll);
        assert!(config.jobs() >= 1);
    }

    #[test]
    fn test_broken_config_falls_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[install\nprefix = ").unwrap();

        let config = Config::load_or_default(&path);
        assert!(config.install.prefix.is_none());
    }
}
