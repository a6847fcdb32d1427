//! Subprocess execution utilities.
//!
//! Every external tool invocation (backend configure/build/install, symbol
//! probes, privileged file operations) goes through [`ProcessBuilder`] and a
//! [`CommandRunner`]. Arguments are always passed as a structured list; no
//! shell string is ever assembled.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use wait_timeout::ChildExt;

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            timeout: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<OsStr>) -> Self {
        self.env.insert(
            key.as_ref().to_string(),
            value.as_ref().to_string_lossy().into_owned(),
        );
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Bound the invocation by a timeout. The child is killed when it expires.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Get the working directory, if one was set.
    pub fn get_cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Get the environment overrides.
    pub fn get_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Get the timeout, if one was set.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        // A group of its own keeps a terminal Ctrl-C away from the tool and
        // lets a timeout take down everything it spawned.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }

    /// Execute the command and wait for completion or timeout.
    ///
    /// Output is drained on background threads so a chatty build tool can
    /// never block on a full pipe while we wait on it.
    pub fn exec(&self) -> Result<ProcessOutput> {
        let mut child = self
            .build_command()
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.program.display()))?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let (code, timed_out) = match self.timeout {
            Some(limit) => match child
                .wait_timeout(limit)
                .with_context(|| format!("failed to wait for `{}`", self.program.display()))?
            {
                Some(status) => (status.code(), false),
                None => {
                    tracing::warn!(
                        "`{}` exceeded its {}s timeout; killing it",
                        self.display_command(),
                        limit.as_secs()
                    );
                    kill_process_group(&mut child);
                    (None, true)
                }
            },
            None => {
                let status = child
                    .wait()
                    .with_context(|| format!("failed to wait for `{}`", self.program.display()))?;
                (status.code(), false)
            }
        };

        // After a kill, a descendant that left the group may still hold the
        // pipes open; take what has arrived instead of waiting on it.
        let grace = timed_out.then_some(DRAIN_GRACE);
        Ok(ProcessOutput {
            code,
            stdout: join_drain(stdout, grace),
            stderr: join_drain(stderr, grace),
            timed_out,
        })
    }

    /// Display the command for logs and error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// How long to wait for output pipes once a timed-out command was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

fn drain<R: Read + Send + 'static>(mut reader: R) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

fn join_drain(output: Option<mpsc::Receiver<String>>, grace: Option<Duration>) -> String {
    let Some(rx) = output else {
        return String::new();
    };
    match grace {
        Some(limit) => rx.recv_timeout(limit).unwrap_or_default(),
        None => rx.recv().unwrap_or_default(),
    }
}

/// Kill a timed-out child together with everything it spawned.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    // The child leads its own group (see `build_command`), so its pid is
    // the group id. It may have exited between the timeout and the kill.
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: killpg only sends a signal; an unknown group yields ESRCH.
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Captured result of one process invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code (None when killed by a signal or by the timeout)
    pub code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Whether the invocation hit its timeout
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Whether the process exited with status zero.
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }

    /// Stdout followed by stderr, as a single log chunk.
    pub fn combined(&self) -> String {
        let mut log = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        log.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stdout.ends_with('\n') {
            log.push('\n');
        }
        log.push_str(&self.stderr);
        log
    }
}

/// Executes commands on behalf of the engine.
///
/// The system implementation spawns real processes; tests substitute a
/// scripted executor.
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion (or timeout) and capture its output.
    fn run(&self, cmd: &ProcessBuilder) -> Result<ProcessOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &ProcessBuilder) -> Result<ProcessOutput> {
        tracing::debug!("running `{}`", cmd.display_command());
        cmd.exec()
    }
}

/// Find an executable in PATH.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Find the first available executable, honoring an environment override.
pub fn find_tool(env_var: &str, candidates: &[&str]) -> Option<PathBuf> {
    if let Ok(value) = std::env::var(env_var) {
        if let Some(path) = find_executable(&value) {
            return Some(path);
        }
    }

    candidates.iter().find_map(|c| find_executable(c))
}
