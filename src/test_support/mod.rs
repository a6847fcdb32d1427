//! Test utilities and mocks for quay unit tests.
//!
//! Process execution and source fetching are the two collaborators the
//! engine talks to through traits; this module provides scripted stand-ins
//! for both.
//!
//! # Example
//!
//! ```rust,ignore
//! use quay::test_support::{MockExecutor, MockProcessOutput};
//!
//! let exec = Arc::new(MockExecutor::new());
//! exec.expect("cmake --version", MockProcessOutput::success("cmake version 3.27.4"));
//! let probe = SymbolProbe::new(exec.clone(), &toolchain);
//! ```

pub mod fixtures;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};

use crate::core::Package;
use crate::sources::{FetchError, Fetcher};
use crate::util::process::{CommandRunner, ProcessBuilder, ProcessOutput};

pub use fixtures::*;

/// Mock process output for testing command execution.
#[derive(Debug, Clone)]
pub struct MockProcessOutput {
    /// Exit status code (0 = success).
    pub status: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Whether the command should look like it hit its timeout.
    pub timed_out: bool,
}

impl MockProcessOutput {
    /// Create a successful output with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        MockProcessOutput {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            timed_out: false,
        }
    }

    /// Create a failure output with the given stderr and status code.
    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        MockProcessOutput {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
            timed_out: false,
        }
    }

    /// Create an output that was killed by its timeout.
    pub fn timeout() -> Self {
        MockProcessOutput {
            status: -1,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        }
    }
}

impl Default for MockProcessOutput {
    fn default() -> Self {
        MockProcessOutput::success("")
    }
}

impl From<MockProcessOutput> for ProcessOutput {
    fn from(mock: MockProcessOutput) -> Self {
        ProcessOutput {
            code: if mock.timed_out { None } else { Some(mock.status) },
            stdout: mock.stdout,
            stderr: mock.stderr,
            timed_out: mock.timed_out,
        }
    }
}

/// Pattern for matching commands in MockExecutor.
#[derive(Debug, Clone)]
pub enum CommandPattern {
    /// Exact match on full command string.
    Exact(String),
    /// Match if command starts with prefix.
    StartsWith(String),
    /// Match if command contains substring.
    Contains(String),
    /// Match using a regex pattern.
    Regex(String),
    /// Match any command.
    Any,
}

impl CommandPattern {
    /// Check if this pattern matches the given command.
    pub fn matches(&self, cmd: &str) -> bool {
        match self {
            CommandPattern::Exact(s) => cmd == s,
            CommandPattern::StartsWith(s) => cmd.starts_with(s),
            CommandPattern::Contains(s) => cmd.contains(s),
            CommandPattern::Regex(pattern) => regex::Regex::new(pattern)
                .map(|re| re.is_match(cmd))
                .unwrap_or(false),
            CommandPattern::Any => true,
        }
    }
}

/// Expectation for a command execution.
#[derive(Debug, Clone)]
pub struct CommandExpectation {
    /// Pattern to match against commands.
    pub pattern: CommandPattern,
    /// Output to return when matched.
    pub output: MockProcessOutput,
    /// Files written when the command runs, as a real build would.
    pub creates: Vec<PathBuf>,
    /// Number of times this expectation can be used (None = unlimited).
    pub times: Option<usize>,
    /// Number of times this expectation has been used.
    pub used: usize,
}

impl CommandExpectation {
    /// Create a new expectation.
    pub fn new(pattern: CommandPattern, output: MockProcessOutput) -> Self {
        CommandExpectation {
            pattern,
            output,
            creates: Vec::new(),
            times: None,
            used: 0,
        }
    }

    /// Write a file (and its parent directories) each time the command runs.
    pub fn creates(mut self, path: impl AsRef<Path>) -> Self {
        self.creates.push(path.as_ref().to_path_buf());
        self
    }

    /// Set the number of times this expectation can be used.
    pub fn times(mut self, n: usize) -> Self {
        self.times = Some(n);
        self
    }

    /// Check if this expectation can still be used.
    pub fn available(&self) -> bool {
        match self.times {
            Some(n) => self.used < n,
            None => true,
        }
    }
}

#[derive(Debug, Default)]
struct ExecutorState {
    expectations: Vec<CommandExpectation>,
    calls: Vec<String>,
    default_output: Option<MockProcessOutput>,
}

/// Mock process executor for testing command execution.
///
/// Records every command it is asked to run and answers from the first
/// matching expectation. Shared behind an `Arc` as a [`CommandRunner`], so
/// all methods take `&self`.
#[derive(Debug, Default)]
pub struct MockExecutor {
    state: Mutex<ExecutorState>,
}

impl MockExecutor {
    /// Create a new mock executor.
    pub fn new() -> Self {
        MockExecutor::default()
    }

    fn state(&self) -> MutexGuard<'_, ExecutorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an expectation for an exact command match.
    pub fn expect(&self, cmd: &str, output: MockProcessOutput) -> &Self {
        self.expect_pattern(CommandExpectation::new(
            CommandPattern::Exact(cmd.to_string()),
            output,
        ))
    }

    /// Add an expectation for a command starting with a prefix.
    pub fn expect_prefix(&self, prefix: &str, output: MockProcessOutput) -> &Self {
        self.expect_pattern(CommandExpectation::new(
            CommandPattern::StartsWith(prefix.to_string()),
            output,
        ))
    }

    /// Add an expectation for a command containing a substring.
    pub fn expect_contains(&self, substring: &str, output: MockProcessOutput) -> &Self {
        self.expect_pattern(CommandExpectation::new(
            CommandPattern::Contains(substring.to_string()),
            output,
        ))
    }

    /// Add a custom expectation.
    pub fn expect_pattern(&self, expectation: CommandExpectation) -> &Self {
        self.state().expectations.push(expectation);
        self
    }

    /// Set a default output for commands that don't match any expectation.
    pub fn set_default(&self, output: MockProcessOutput) -> &Self {
        self.state().default_output = Some(output);
        self
    }

    /// Get all commands that were called.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of calls containing `substring`.
    pub fn calls_matching(&self, substring: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.contains(substring))
            .count()
    }

    /// Verify that all expectations with a specific count were satisfied.
    pub fn verify(&self) -> Result<()> {
        for (i, exp) in self.state().expectations.iter().enumerate() {
            if let Some(expected) = exp.times {
                if exp.used != expected {
                    bail!(
                        "expectation {} was used {} times, expected {}",
                        i,
                        exp.used,
                        expected
                    );
                }
            }
        }
        Ok(())
    }
}

impl CommandRunner for MockExecutor {
    fn run(&self, cmd: &ProcessBuilder) -> Result<ProcessOutput> {
        let full_cmd = cmd.display_command();
        let mut state = self.state();
        state.calls.push(full_cmd.clone());

        let matched = state
            .expectations
            .iter_mut()
            .find(|exp| exp.pattern.matches(&full_cmd) && exp.available());

        let (output, creates) = match matched {
            Some(exp) => {
                exp.used += 1;
                (exp.output.clone(), exp.creates.clone())
            }
            None => match state.default_output {
                Some(ref default) => (default.clone(), Vec::new()),
                None => bail!("unexpected command: {}", full_cmd),
            },
        };
        drop(state);

        for path in creates {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, full_cmd.as_bytes())?;
        }

        Ok(output.into())
    }
}

/// What a [`MockFetcher`] returns for one package.
#[derive(Debug, Clone)]
pub enum MockFetch {
    /// A source directory
    Dir(PathBuf),
    /// A fetch failure with these messages
    Fail(Vec<String>),
}

/// Scripted source fetcher that counts requests.
#[derive(Debug, Default)]
pub struct MockFetcher {
    results: Mutex<HashMap<String, MockFetch>>,
    requests: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        MockFetcher::default()
    }

    /// Serve `dir` as the sources of `package`.
    pub fn serve(&self, package: &str, dir: impl Into<PathBuf>) -> &Self {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(package.to_string(), MockFetch::Dir(dir.into()));
        self
    }

    /// Fail every fetch of `package`.
    pub fn fail(&self, package: &str, message: &str) -> &Self {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(package.to_string(), MockFetch::Fail(vec![message.to_string()]));
        self
    }

    /// Packages fetched so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, package: &Package) -> std::result::Result<PathBuf, FetchError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(package.name.to_string());

        let result = self
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(package.name.as_str())
            .cloned();

        match result {
            Some(MockFetch::Dir(dir)) => Ok(dir),
            Some(MockFetch::Fail(errors)) => Err(FetchError::AllFailed {
                package: package.name.clone(),
                errors,
            }),
            None => Err(FetchError::NoLocations {
                package: package.name.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_executor_exact_match() {
        let exec = MockExecutor::new();
        exec.expect("cmake --version", MockProcessOutput::success("cmake version 3.27.4"));

        let output = exec
            .run(&ProcessBuilder::new("cmake").arg("--version"))
            .unwrap();
        assert!(output.success());
        assert!(output.stdout.contains("3.27.4"));
        assert_eq!(exec.calls(), vec!["cmake --version".to_string()]);
    }

    #[test]
    fn test_mock_executor_unexpected_command() {
        let exec = MockExecutor::new();
        assert!(exec.run(&ProcessBuilder::new("make")).is_err());
    }

    #[test]
    fn test_mock_executor_times() {
        let exec = MockExecutor::new();
        exec.expect_pattern(
            CommandExpectation::new(
                CommandPattern::StartsWith("make".into()),
                MockProcessOutput::success(""),
            )
            .times(1),
        );
        exec.set_default(MockProcessOutput::failure(1, "again"));

        assert!(exec.run(&ProcessBuilder::new("make")).unwrap().success());
        assert!(!exec.run(&ProcessBuilder::new("make")).unwrap().success());
        exec.verify().unwrap();
    }

    #[test]
    fn test_timeout_output_has_no_code() {
        let output: ProcessOutput = MockProcessOutput::timeout().into();
        assert!(output.timed_out);
        assert_eq!(output.code, None);
    }

    #[test]
    fn test_command_pattern_regex() {
        let pattern = CommandPattern::Regex(r"^cmake -S \S+ -B".to_string());
        assert!(pattern.matches("cmake -S /src -B /build"));
        assert!(!pattern.matches("make install"));
    }
}
