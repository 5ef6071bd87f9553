//! Observability rows: error log and background task log
//!
//! Both tables are append-only. The error log feeds the operator surface
//! and optional webhook forwarding; the task log doubles as the advisory
//! lock that keeps multiple worker processes from running the same task
//! concurrently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Error log
// ============================================================================

/// Error severity, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// String form used in the database and configuration
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// Error category, matching the failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Storage backend failures (full, unreachable, hash mismatch on commit)
    Store,
    /// Async transport and callback delivery failures
    Transport,
    /// Peer protocol failures (unexpected structure, name mismatch)
    Peer,
    /// Database failures
    Database,
    /// Assertion and constraint violations
    Internal,
    /// API surface failures worth recording
    Webserver,
}

impl ErrorCategory {
    /// String form used in the database and configuration
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Store => "store",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Peer => "peer",
            ErrorCategory::Database => "database",
            ErrorCategory::Internal => "internal",
            ErrorCategory::Webserver => "webserver",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "store" => Some(ErrorCategory::Store),
            "transport" => Some(ErrorCategory::Transport),
            "peer" => Some(ErrorCategory::Peer),
            "database" => Some(ErrorCategory::Database),
            "internal" => Some(ErrorCategory::Internal),
            "webserver" => Some(ErrorCategory::Webserver),
            _ => None,
        }
    }
}

/// One appended error row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLog {
    /// Database row id (0 until persisted)
    pub id: i64,
    pub severity: Severity,
    pub category: ErrorCategory,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl ErrorLog {
    /// Creates a new error row stamped with the current time
    pub fn new(severity: Severity, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            severity,
            category,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Background task log
// ============================================================================

/// Outcome of one background task run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

impl TaskOutcome {
    /// String form used in the database
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Succeeded => "succeeded",
            TaskOutcome::Failed => "failed",
            TaskOutcome::TimedOut => "timed_out",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(TaskOutcome::Succeeded),
            "failed" => Some(TaskOutcome::Failed),
            "timed_out" => Some(TaskOutcome::TimedOut),
            _ => None,
        }
    }
}

/// One background task run, also the claim row for task-level mutual
/// exclusion across worker processes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundTaskLog {
    /// Database row id (0 until persisted)
    pub id: i64,
    /// Task name from the background configuration
    pub task_name: String,
    /// When a worker claimed the task
    pub claimed_at: DateTime<Utc>,
    /// When the run finished; None while running
    pub finished_at: Option<DateTime<Utc>>,
    /// Outcome; None while running
    pub outcome: Option<TaskOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn test_category_roundtrip() {
        use ErrorCategory::*;
        for c in [Store, Transport, Peer, Database, Internal, Webserver] {
            assert_eq!(ErrorCategory::parse(c.as_str()), Some(c));
        }
    }

    #[test]
    fn test_error_log_stamps_time() {
        let row = ErrorLog::new(Severity::Warning, ErrorCategory::Transport, "poll failed");
        assert_eq!(row.id, 0);
        assert_eq!(row.severity, Severity::Warning);
    }
}
