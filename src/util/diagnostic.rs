//! User-facing diagnostic messages.
//!
//! Every install failure is rendered with its root cause, the context that
//! lets an operator tell a missing download from an incompatible existing
//! install from a genuine build error, and suggested fixes.

use std::fmt;
use std::path::PathBuf;

/// Common suggestion messages for consistent error handling.
pub mod suggestions {
    /// Suggestion when the prefix cannot be written.
    pub const PRIVILEGED_INSTALL: &str =
        "Set `install-sudo = \"sudo\"` under [install] in .quay/config.toml, or pass --install-sudo sudo";

    /// Suggestion to use a writable prefix instead.
    pub const WRITABLE_PREFIX: &str = "Choose a writable install prefix with --prefix <dir>";

    /// Suggestion when a build fails.
    pub const BUILD_FAILED: &str = "Inspect the captured log above or rerun with --verbose";

    /// Suggestion when an existing install was rejected.
    pub const EXISTING_REJECTED: &str =
        "Point quay at a compatible install with --with-dir <package>=<dir>";

    /// Suggestion for fetch failures.
    pub const FETCH_FAILED: &str = "Check your network connection and the recipe's fetch URLs";

    /// Suggestion for dependency cycles.
    pub const CYCLE: &str = "Break the cycle by editing the `dependencies` of one recipe";
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A diagnostic message with optional suggestions.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Primary message
    pub message: String,
    /// Severity level
    pub severity: Severity,
    /// Additional context lines
    pub context: Vec<String>,
    /// Verbatim attachment, e.g. a captured backend log
    pub attachment: Option<String>,
    /// Suggested fixes
    pub suggestions: Vec<String>,
    /// Related location (file path)
    pub location: Option<PathBuf>,
}

impl Diagnostic {
    fn with_severity(message: impl Into<String>, severity: Severity) -> Self {
        Diagnostic {
            message: message.into(),
            severity,
            context: Vec::new(),
            attachment: None,
            suggestions: Vec::new(),
            location: None,
        }
    }

    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Error)
    }

    /// Create a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Warning)
    }

    /// Create a new note diagnostic.
    pub fn note(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Note)
    }

    /// Add context to the diagnostic.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Attach a verbatim block such as a captured log.
    pub fn with_attachment(mut self, attachment: impl Into<String>) -> Self {
        let attachment = attachment.into();
        if !attachment.trim().is_empty() {
            self.attachment = Some(attachment);
        }
        self
    }

    /// Add a suggestion for fixing the issue.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Add a file location.
    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = Some(path.into());
        self
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let mut output = String::new();

        let severity_str = if color {
            match self.severity {
                Severity::Error => "\x1b[1;31merror\x1b[0m",
                Severity::Warning => "\x1b[1;33mwarning\x1b[0m",
                Severity::Note => "\x1b[1;36mnote\x1b[0m",
            }
        } else {
            match self.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
                Severity::Note => "note",
            }
        };

        output.push_str(&format!("{}: {}\n", severity_str, self.message));

        if let Some(ref path) = self.location {
            output.push_str(&format!("  --> {}\n", path.display()));
        }

        for ctx in &self.context {
            output.push_str(&format!("  = {}\n", ctx));
        }

        if let Some(ref attachment) = self.attachment {
            output.push_str("  captured output:\n");
            for line in attachment.lines() {
                output.push_str(&format!("    | {}\n", line));
            }
        }

        if !self.suggestions.is_empty() {
            output.push('\n');
            let help_prefix = if color {
                "\x1b[1;32mhelp\x1b[0m"
            } else {
                "help"
            };
            output.push_str(&format!("{}: consider:\n", help_prefix));
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, suggestion));
            }
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

/// Print a diagnostic to stderr.
pub fn emit(diagnostic: &Diagnostic, color: bool) {
    eprint!("{}", diagnostic.format(color));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_formatting() {
        let diag = Diagnostic::error("failed to build `ctetgen`")
            .with_context("backend: autotools")
            .with_attachment("make: *** [all] Error 2\n")
            .with_suggestion(suggestions::BUILD_FAILED);

        let output = diag.format(false);
        assert!(output.contains("error: failed to build `ctetgen`"));
        assert!(output.contains("  = backend: autotools"));
        assert!(output.contains("    | make: *** [all] Error 2"));
        assert!(output.contains("help: consider:"));
        assert!(output.contains("1. Inspect the captured log"));
    }

    #[test]
    fn test_blank_attachment_is_dropped() {
        let diag = Diagnostic::warning("w").with_attachment("  \n");
        assert!(diag.attachment.is_none());
        assert!(!diag.format(false).contains("captured output"));
    }
}
