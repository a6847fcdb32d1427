//! Install event types for JSON output.
//!
//! Events are emitted while a session runs and, with
//! `--message-format=json`, written one JSON object per line before the
//! final report.
//!
//! # Event Types
//!
//! - `stage-changed`: A package entered a new install stage
//! - `package-finished`: A package reached a terminal state
//! - `session-finished`: Every requested package has been handled

use std::sync::Arc;

use serde::Serialize;

use crate::core::{InstallStage, Origin, PackageName};

/// An event emitted during an install session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason")]
pub enum InstallEvent {
    /// A package moved to another stage.
    #[serde(rename = "stage-changed")]
    StageChanged {
        package: PackageName,
        stage: InstallStage,
    },

    /// A package became usable or failed.
    #[serde(rename = "package-finished")]
    PackageFinished {
        package: PackageName,
        usable: bool,
        /// Whether the install was found or built; absent on failure
        #[serde(skip_serializing_if = "Option::is_none")]
        origin: Option<Origin>,
        /// Failure kind, absent on success
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<&'static str>,
    },

    /// The session completed.
    #[serde(rename = "session-finished")]
    SessionFinished {
        success: bool,
        duration_ms: u64,
        packages: usize,
    },
}

impl InstallEvent {
    pub fn stage(package: &PackageName, stage: InstallStage) -> Self {
        InstallEvent::StageChanged {
            package: package.clone(),
            stage,
        }
    }

    /// Serialize this event to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Receiver of install events; shared across worker threads.
pub type EventSink = Arc<dyn Fn(&InstallEvent) + Send + Sync>;

/// A sink that drops every event.
pub fn discard() -> EventSink {
    Arc::new(|_: &InstallEvent| {})
}
