//! Response records for the seven tool operations. Every success carries a
//! `correlation_id` and a one-line `summary`; every failure is a
//! `MutationErrorResponse` wrapping a `StandardError`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::action::Action;
use crate::error::StandardError;
use crate::plan::Plan;
use crate::request::{ResolvedTarget, TargetSelector, TargetSource};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Statuses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-operation and per-target outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Top-level apply outcome across all targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::PartialSuccess => "PARTIAL_SUCCESS",
            ExecutionStatus::Failed => "FAILED",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation_id: String,
    pub action: Action,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StandardError>,
}

impl OperationResult {
    pub fn success(operation_id: impl Into<String>, action: Action, data: Value) -> Self {
        Self {
            operation_id: operation_id.into(),
            action,
            status: OutcomeStatus::Success,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(operation_id: impl Into<String>, action: Action, error: StandardError) -> Self {
        Self {
            operation_id: operation_id.into(),
            action,
            status: OutcomeStatus::Failed,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetResult {
    pub project_id: String,
    pub status: OutcomeStatus,
    pub operations: Vec<OperationResult>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `changes.preview` success: the stored plan, verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub correlation_id: String,
    pub summary: String,
    #[serde(flatten)]
    pub plan: Plan,
}

/// `changes.apply` success (including partial success).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub correlation_id: String,
    pub summary: String,
    pub status: ExecutionStatus,
    pub plan_id: String,
    pub plan_hash: String,
    pub target_results: Vec<TargetResult>,
}

/// Any tool failure: no side effects happened past the point of error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationErrorResponse {
    pub correlation_id: String,
    pub status: ExecutionStatus,
    pub summary: String,
    pub error: StandardError,
}

impl MutationErrorResponse {
    pub fn new(correlation_id: impl Into<String>, error: StandardError) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: ExecutionStatus::Failed,
            summary: error.to_string(),
            error,
        }
    }
}

/// `capabilities.list` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainFlags {
    pub project: bool,
    pub database: bool,
    pub auth: bool,
    pub function: bool,
    pub operation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub domains: DomainFlags,
    pub transport_default: String,
    pub supported_transports: Vec<String>,
    pub auto_targeting_enabled: bool,
    pub scope_catalog_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    pub correlation_id: String,
    pub summary: String,
    pub capabilities: Capabilities,
}

/// `context.get` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextResponse {
    pub correlation_id: String,
    pub summary: String,
    pub known_project_ids: Vec<String>,
    pub alias_count: usize,
    pub auto_target_project_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_target_selector: Option<TargetSelector>,
}

/// `targets.resolve` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub correlation_id: String,
    pub summary: String,
    pub resolved_targets: Vec<ResolvedTarget>,
    pub source: TargetSource,
}

/// `scopes.catalog.get` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub required_scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogResponse {
    pub correlation_id: String,
    pub summary: String,
    pub catalog_version: String,
    pub actions: BTreeMap<String, CatalogEntry>,
}

/// `confirm.issue` payload. `expires_at` is unix seconds, matching the
/// expiry encoded inside the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmIssueResponse {
    pub correlation_id: String,
    pub summary: String,
    pub token: String,
    pub expires_at: i64,
}

/// Timestamp helper kept here so response builders agree on the clock type.
pub fn unix_seconds(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::RiskLevel;

    #[test]
    fn statuses_serialize_screaming() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::PartialSuccess).unwrap(),
            r#""PARTIAL_SUCCESS""#
        );
        assert_eq!(
            serde_json::to_string(&OutcomeStatus::Failed).unwrap(),
            r#""FAILED""#
        );
    }

    #[test]
    fn preview_response_flattens_plan() {
        let now = Utc::now();
        let resp = PreviewResponse {
            correlation_id: "corr_1".into(),
            summary: "planned 1 operation".into(),
            plan: Plan {
                plan_id: "plan_1".into(),
                plan_hash: "deadbeef".into(),
                actor: "ci".into(),
                target_projects: vec!["p1".into()],
                operations: vec![],
                required_scopes: vec!["databases.write".into()],
                destructive_count: 0,
                risk_level: RiskLevel::Low,
                created_at: now,
                expires_at: now,
            },
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["plan_id"], "plan_1");
        assert_eq!(json["risk_level"], "LOW");
        assert!(json.get("plan").is_none(), "plan fields must be flattened");
    }

    #[test]
    fn error_response_summary_defaults_to_error_display() {
        let resp = MutationErrorResponse::new(
            "corr_2",
            StandardError::validation("operations must not be empty"),
        );
        assert_eq!(resp.status, ExecutionStatus::Failed);
        assert!(resp.summary.starts_with("VALIDATION_ERROR"));
    }
}
