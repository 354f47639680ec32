//! Audit records. Appended once per planned and executed operation;
//! `details` must already be redacted by the time a record is built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Planned,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub target_project: String,
    pub operation_id: String,
    pub outcome: AuditOutcome,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AuditRecord {
    pub fn new(
        actor: impl Into<String>,
        target_project: impl Into<String>,
        operation_id: impl Into<String>,
        outcome: AuditOutcome,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.into(),
            timestamp: Utc::now(),
            target_project: target_project.into(),
            operation_id: operation_id.into(),
            outcome,
            correlation_id: correlation_id.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}
