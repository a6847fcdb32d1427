//! Shell output and progress for the command-line surface.
//!
//! Human and JSON modes are mutually exclusive: in JSON mode only the final
//! report is written to stdout and status lines are suppressed.

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Shell output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellMode {
    /// Human-readable status lines on stderr.
    Human { verbosity: Verbosity, color: bool },
    /// Machine-readable JSON on stdout only.
    Json,
}

/// Output verbosity level (Human mode only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

/// Status types for output messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Finished,
    Found,
    Searching,
    Fetching,
    Building,
    Planned,
    Failed,
    Warning,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Status::Finished => "Finished",
            Status::Found => "Found",
            Status::Searching => "Searching",
            Status::Fetching => "Fetching",
            Status::Building => "Building",
            Status::Planned => "Planned",
            Status::Failed => "Failed",
            Status::Warning => "Warning",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Status::Finished | Status::Found => "\x1b[1;32m",
            Status::Searching
            | Status::Fetching
            | Status::Building
            | Status::Planned => "\x1b[1;36m",
            Status::Warning => "\x1b[1;33m",
            Status::Failed => "\x1b[1;31m",
        }
    }
}

/// Central shell for CLI output.
#[derive(Debug)]
pub struct Shell {
    mode: ShellMode,
}

impl Shell {
    /// Create a shell from CLI flags. JSON takes precedence over quiet/verbose.
    pub fn from_flags(quiet: bool, verbose: bool, no_color: bool, json: bool) -> Self {
        let mode = if json {
            ShellMode::Json
        } else {
            let verbosity = if quiet {
                Verbosity::Quiet
            } else if verbose {
                Verbosity::Verbose
            } else {
                Verbosity::Normal
            };
            ShellMode::Human {
                verbosity,
                color: !no_color && io::stderr().is_terminal(),
            }
        };

        Shell { mode }
    }

    /// Check if shell is in JSON mode.
    pub fn is_json(&self) -> bool {
        matches!(self.mode, ShellMode::Json)
    }

    /// Check if colors are enabled.
    pub fn use_color(&self) -> bool {
        matches!(self.mode, ShellMode::Human { color: true, .. })
    }

    fn is_quiet(&self) -> bool {
        matches!(
            self.mode,
            ShellMode::Human {
                verbosity: Verbosity::Quiet,
                ..
            }
        )
    }

    /// Print a status line: `{status:>12} {message}`.
    pub fn status(&self, status: Status, msg: impl Display) {
        if self.is_json() || (self.is_quiet() && status != Status::Failed) {
            return;
        }

        let text = status.as_str();
        if self.use_color() {
            eprintln!("{}{:>12}\x1b[0m {}", status.color_code(), text, msg);
        } else {
            eprintln!("{:>12} {}", text, msg);
        }
    }

    /// Print a warning line.
    pub fn warn(&self, msg: impl Display) {
        self.status(Status::Warning, msg);
    }

    /// Write a JSON document to stdout as a single line.
    pub fn json(&self, value: &serde_json::Value) {
        let rendered = serde_json::to_string(value).unwrap_or_default();
        println!("{}", rendered);
        let _ = io::stdout().flush();
    }

    /// Start a spinner for a long-running step. Hidden unless stderr is an
    /// interactive terminal in normal verbosity.
    pub fn spinner(&self, msg: impl Display) -> ProgressBar {
        let interactive = matches!(
            self.mode,
            ShellMode::Human {
                verbosity: Verbosity::Normal,
                ..
            }
        ) && io::stderr().is_terminal();

        if !interactive {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_takes_precedence() {
        let shell = Shell::from_flags(true, true, false, true);
        assert!(shell.is_json());
        assert!(!shell.use_color());
    }

    #[test]
    fn test_no_color_flag() {
        let shell = Shell::from_flags(false, false, true, false);
        assert!(!shell.use_color());
        assert!(!shell.is_json());
    }
}
