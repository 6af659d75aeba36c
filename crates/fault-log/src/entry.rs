use serde::{Deserialize, Serialize};

/// A single fault record reported by one of the rewriting components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub severity: Severity,
    pub component: String,
    pub message: String,
    /// Flattened `source()` chain of the error that caused the fault, outermost
    /// first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl FaultEntry {
    /// Create a new `FaultEntry` with an auto-generated UUID v4 and the current
    /// UTC timestamp. Severity defaults to [`Severity::Fatal`]; the cause chain
    /// and details start out empty.
    pub fn new(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            severity: Severity::Fatal,
            component: component.into(),
            message: message.into(),
            causes: Vec::new(),
            details: serde_json::Value::Null,
        }
    }

    /// Record the full `source()` chain of `err`, starting with `err` itself.
    pub fn with_cause(mut self, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = current {
            self.causes.push(e.to_string());
            current = e.source();
        }
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// How bad a reported fault is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The component recovered locally and rewriting continued in a degraded
    /// form (e.g. an unrewritten URL leaked through).
    Degraded,
    /// An invariant was violated and the operation was aborted.
    Fatal,
}
