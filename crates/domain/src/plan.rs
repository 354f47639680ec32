//! Plan records: the hashed, time-limited ticket a preview returns and an
//! apply must echo back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{Action, ActionDomain};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Risk
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Normalized operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An operation after planning: catalog scopes unioned in (sorted, deduped)
/// and the destructive/critical flags settled. This is what gets hashed and
/// what the executor runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOperation {
    pub operation_id: String,
    pub action: Action,
    pub params: Value,
    pub required_scopes: Vec<String>,
    pub destructive: bool,
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl NormalizedOperation {
    pub fn descriptor(&self) -> PlanOperation {
        PlanOperation {
            operation_id: self.operation_id.clone(),
            domain: self.action.domain(),
            action: self.action,
            destructive: self.destructive,
            critical: self.critical,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plans
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Descriptor for one planned operation, as exposed in a preview response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOperation {
    pub operation_id: String,
    pub domain: ActionDomain,
    pub action: Action,
    pub destructive: bool,
    pub critical: bool,
}

/// Immutable once built. Stored server-side keyed by `plan_id` until the
/// TTL lapses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub plan_hash: String,
    pub actor: String,
    pub target_projects: Vec<String>,
    pub operations: Vec<PlanOperation>,
    pub required_scopes: Vec<String>,
    pub destructive_count: usize,
    pub risk_level: RiskLevel,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Plan {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True when any planned operation requires a confirmation token.
    pub fn is_critical(&self) -> bool {
        self.operations.iter().any(|op| op.critical)
    }
}
