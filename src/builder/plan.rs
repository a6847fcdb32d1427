//! Build plan generation.
//!
//! A BuildPlan is the fully expanded, backend-specific sequence of steps for
//! one package: tool checks, structured command lines with every dependency
//! path already substituted, and explicit prefix mutations. It is created
//! from a recipe plus its resolved dependencies, consumed once, and dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::builder::toolchain::Toolchain;
use crate::core::{Package, PackageName};
use crate::resolver::DependencyResult;
use crate::util::process::ProcessBuilder;

/// Everything a backend needs to plan a build.
#[derive(Debug, Clone)]
pub struct PlanContext<'a> {
    pub package: &'a Package,
    /// Unpacked sources
    pub source_dir: PathBuf,
    /// Scratch build tree
    pub build_dir: PathBuf,
    /// Shared install prefix root
    pub prefix: PathBuf,
    pub toolchain: &'a Toolchain,
    /// Usable dependencies, in declared order
    pub dependencies: &'a [DependencyResult],
    /// Parallel jobs for the backend's own build
    pub jobs: usize,
    /// Timeout for each backend invocation
    pub timeout: Duration,
}

/// Stage of a build a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Check,
    Configure,
    Compile,
    Install,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Check => "check",
            Phase::Configure => "configure",
            Phase::Compile => "compile",
            Phase::Install => "install",
        };
        f.pad(s)
    }
}

/// A structured command line. Arguments are never joined into a shell string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandLine {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Turn into a process invocation bounded by `timeout`.
    pub fn to_process(&self, timeout: Duration) -> ProcessBuilder {
        let mut pb = ProcessBuilder::new(&self.program)
            .args(&self.args)
            .timeout(timeout);
        for (key, value) in &self.env {
            pb = pb.env(key, value);
        }
        if let Some(ref cwd) = self.cwd {
            pb = pb.cwd(cwd);
        }
        pb
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// One step of a build plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildStep {
    /// Require a tool, optionally at a minimum version
    RequireTool {
        tool: String,
        program: Option<PathBuf>,
        min_version: Option<semver::Version>,
    },
    /// Run a backend command
    Run { phase: Phase, command: CommandLine },
    /// Create directories under the prefix
    MakeDirs { dirs: Vec<PathBuf> },
    /// Copy files into the prefix
    CopyFiles { files: Vec<(PathBuf, PathBuf)> },
    /// Remove an artifact left over from an earlier build before regenerating it
    RemoveStale { path: PathBuf },
    /// Move a build artifact to its final name in the prefix
    Relocate { from: PathBuf, to: PathBuf },
}

impl BuildStep {
    /// Phase the step runs in.
    pub fn phase(&self) -> Phase {
        match self {
            BuildStep::RequireTool { .. } => Phase::Check,
            BuildStep::Run { phase, .. } => *phase,
            BuildStep::MakeDirs { .. }
            | BuildStep::CopyFiles { .. }
            | BuildStep::RemoveStale { .. }
            | BuildStep::Relocate { .. } => Phase::Install,
        }
    }

    /// Whether the step mutates the shared prefix.
    pub fn touches_prefix(&self) -> bool {
        self.phase() == Phase::Install
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStep::RequireTool {
                tool, min_version, ..
            } => match min_version {
                Some(v) => write!(f, "require {} >= {}", tool, v),
                None => write!(f, "require {}", tool),
            },
            BuildStep::Run { phase, command } => write!(f, "{:<9} {}", phase, command),
            BuildStep::MakeDirs { dirs } => {
                let dirs: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
                write!(f, "mkdir     {}", dirs.join(" "))
            }
            BuildStep::CopyFiles { files } => {
                let files: Vec<String> = files
                    .iter()
                    .map(|(from, to)| format!("{} -> {}", from.display(), to.display()))
                    .collect();
                write!(f, "copy      {}", files.join(", "))
            }
            BuildStep::RemoveStale { path } => write!(f, "remove    {}", path.display()),
            BuildStep::Relocate { from, to } => {
                write!(f, "relocate  {} -> {}", from.display(), to.display())
            }
        }
    }
}

/// A complete build plan for one package.
#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
    pub package: PackageName,
    /// Backend kind (`cmake`, `autotools`, `custom`)
    pub backend: &'static str,
    /// Steps in execution order
    pub steps: Vec<BuildStep>,
    /// Timeout applied to every command
    #[serde(serialize_with = "serialize_secs")]
    pub timeout: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

impl BuildPlan {
    /// Human-readable step listing.
    pub fn describe(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.to_string()).collect()
    }

    /// Commands of a given phase.
    pub fn commands(&self, phase: Phase) -> impl Iterator<Item = &CommandLine> {
        self.steps.iter().filter_map(move |s| match s {
            BuildStep::Run { phase: p, command } if *p == phase => Some(command),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_command_line_display_and_process() {
        let cmd = CommandLine::new("cmake")
            .args(["--build", "/b"])
            .cwd("/src")
            .env("QUAY_JOBS", "4");

        assert_eq!(cmd.to_string(), "cmake --build /b");

        let pb = cmd.to_process(Duration::from_secs(5));
        assert_eq!(pb.get_args(), &["--build".to_string(), "/b".to_string()]);
        assert_eq!(pb.get_cwd(), Some(Path::new("/src")));
        assert_eq!(pb.get_env().get("QUAY_JOBS").map(String::as_str), Some("4"));
        assert_eq!(pb.get_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_step_phases() {
        let relocate = BuildStep::Relocate {
            from: PathBuf::from("a"),
            to: PathBuf::from("b"),
        };
        assert!(relocate.touches_prefix());

        let check = BuildStep::RequireTool {
            tool: "cmake".into(),
            program: None,
            min_version: Some(semver::Version::new(3, 9, 0)),
        };
        assert_eq!(check.phase(), Phase::Check);
        assert_eq!(check.to_string(), "require cmake >= 3.9.0");
    }
}
