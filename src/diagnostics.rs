//! Accumulated errors and warnings for a single run.
//!
//! Stages record expected data-shape problems here instead of returning
//! `Err`, and the workflow checks the ledger before invoking FEAT.
use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// Ordered ledger of everything worth surfacing at the end of a run.
#[derive(Serialize, Debug, Default, Clone)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.push(Severity::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.push(Severity::Error, message);
    }

    pub fn critical(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(severity = "critical", "{message}");
        self.push(Severity::Critical, message);
    }

    fn push(&mut self, severity: Severity, message: String) {
        self.entries.push(Diagnostic { severity, message });
    }

    /// True when any error or critical entry was recorded.
    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.severity != Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|entry| entry.severity != Severity::Warning)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|entry| entry.severity == Severity::Warning)
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Re-log everything in one place so the tail of the log is a summary.
    pub fn log_summary(&self) {
        let (warnings, errors): (Vec<&Diagnostic>, Vec<&Diagnostic>) = self
            .entries()
            .iter()
            .partition(|entry| entry.severity == Severity::Warning);
        if !warnings.is_empty() {
            tracing::warn!(count = warnings.len(), "previous warnings:");
            for entry in warnings {
                tracing::warn!("  {}", entry.message);
            }
        }
        if !errors.is_empty() {
            tracing::error!(count = errors.len(), "previous errors:");
            for entry in errors {
                tracing::error!("  {}", entry.message);
            }
        }
    }
}
