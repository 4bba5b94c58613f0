//! Reports returned by the life-cycle calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{CleanupReport, ExecutionSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// A human-readable message attached to a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub level: Level,
    pub text: String,
}

impl Message {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            text: text.into(),
        }
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self {
            level: Level::Warn,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            text: text.into(),
        }
    }
}

/// A sampled health signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartReport {
    pub messages: Vec<Message>,
}

impl StartReport {
    pub fn with_message(message: Message) -> Self {
        Self {
            messages: vec![message],
        }
    }
}

/// Point-in-time progress of an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// The observation window has closed.
    pub completed: bool,
    pub messages: Vec<Message>,
    pub metrics: Vec<Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counters: Option<ExecutionSnapshot>,
    /// Set when a check settled into failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ProgressReport {
    pub fn new(completed: bool) -> Self {
        Self {
            completed,
            ..Default::default()
        }
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.messages.push(Message::info(text));
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        self.messages.push(Message::warn(text));
    }

    pub fn metric(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.push(Metric::new(name, value));
    }

    /// Record a threshold evaluation.
    ///
    /// A violation is only a warning while the window is open; once
    /// `completed` is set it becomes the report's failure. A check that
    /// recovers before the window closes therefore passes.
    pub fn settle(&mut self, violated: bool, detail: impl Into<String>) {
        if !violated {
            return;
        }
        let detail = detail.into();
        if self.completed {
            self.messages.push(Message::error(detail.clone()));
            self.failure.get_or_insert(detail);
        } else {
            self.warn(detail);
        }
    }

    pub fn has_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Summary returned by stop. Never carries a hard error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopReport {
    pub messages: Vec<Message>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counters: Option<ExecutionSnapshot>,
}

impl StopReport {
    pub fn info(&mut self, text: impl Into<String>) {
        self.messages.push(Message::info(text));
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !self.warnings.contains(&text) {
            self.warnings.push(text);
        }
    }

    /// Fold cleanup failures into the warning list, skipping duplicates.
    pub fn absorb(&mut self, cleanup: &CleanupReport) {
        for warning in cleanup.warnings() {
            self.warn(warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_warns_while_open() {
        let mut report = ProgressReport::new(false);
        report.settle(true, "latency 250ms > 100ms");
        assert!(!report.has_failed());
        assert_eq!(report.messages[0].level, Level::Warn);
    }

    #[test]
    fn test_settle_fails_when_completed() {
        let mut report = ProgressReport::new(true);
        report.settle(false, "fine");
        assert!(!report.has_failed());
        report.settle(true, "first");
        report.settle(true, "second");
        assert_eq!(report.failure.as_deref(), Some("first"));
        assert_eq!(report.messages.len(), 2);
    }

    #[test]
    fn test_stop_report_dedups_cleanup_warnings() {
        let mut cleanup = CleanupReport::new();
        cleanup.fail("sweep p-*", "connection refused");
        let mut report = StopReport::default();
        report.absorb(&cleanup);
        report.absorb(&cleanup);
        assert_eq!(report.warnings, vec!["sweep p-*: connection refused".to_string()]);
    }

    #[test]
    fn test_progress_report_json_shape() {
        let mut report = ProgressReport::new(true);
        report.metric("latency_ms", 1.5);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["completed"], true);
        assert_eq!(json["metrics"][0]["name"], "latency_ms");
        assert!(json.get("failure").is_none());
    }
}
