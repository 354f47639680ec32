//! Client-facing request records for the mutation tool surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{Action, ActionDomain};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Targets and selectors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry in a request's `targets[]`: either a project id or an alias.
/// A target with neither field is invalid and resolution fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl TargetInput {
    pub fn project(id: impl Into<String>) -> Self {
        Self {
            project_id: Some(id.into()),
            alias: None,
        }
    }

    pub fn aliased(alias: impl Into<String>) -> Self {
        Self {
            project_id: None,
            alias: Some(alias.into()),
        }
    }
}

/// How a selector interprets its `values`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorMode {
    ProjectId,
    Alias,
    Auto,
}

/// Selector applied when `targets[]` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSelector {
    pub mode: SelectorMode,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Where a resolved target came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetSource {
    Explicit,
    Selector,
    Auto,
}

/// A fully resolved target: the project id is always non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub index: usize,
    pub source: TargetSource,
    pub project_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn default_params() -> Value {
    Value::Object(serde_json::Map::new())
}

/// One intended change as the client submitted it. The plan manager
/// normalizes scopes and may upgrade the destructive/critical hints, never
/// downgrade them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub operation_id: String,
    /// Redundant with `action`'s prefix; validated against it when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<ActionDomain>,
    pub action: Action,
    #[serde(default = "default_params")]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destructive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl OperationSpec {
    pub fn new(operation_id: impl Into<String>, action: Action, params: Value) -> Self {
        Self {
            operation_id: operation_id.into(),
            domain: None,
            action,
            params,
            required_scopes: None,
            destructive: None,
            critical: None,
            idempotency_key: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mutation requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The shared request body for `changes.preview` and `changes.apply`.
/// Apply additionally requires `plan_id` + `plan_hash`, and a
/// `confirmation_token` when the plan is critical. `credentials` is accepted
/// on the wire for shape stability but never read; process configuration is
/// the only credential source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    pub actor: String,
    #[serde(default)]
    pub targets: Vec<TargetInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_selector: Option<TargetSelector>,
    pub operations: Vec<OperationSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_token: Option<String>,
}
