//! Plan construction, storage, and re-verification.
//!
//! A preview normalizes the request's operations (catalog scopes unioned in,
//! destructive/critical flags upgraded, never downgraded), hashes the
//! canonical form, and stores the plan under a TTL. Apply must present the
//! same id and hash, and the request must rehash to the stored value, which
//! catches tampering between preview and apply.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::json;

use pw_domain::action::Action;
use pw_domain::catalog;
use pw_domain::error::{ErrorCode, Result, StandardError};
use pw_domain::plan::{NormalizedOperation, Plan, RiskLevel};
use pw_domain::request::{MutationRequest, ResolvedTarget};

use crate::hash;

pub struct PlanManager {
    plans: Mutex<HashMap<String, Plan>>,
    ttl: Duration,
}

impl PlanManager {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            plans: Mutex::new(HashMap::new()),
            ttl: Duration::seconds(ttl_seconds.min(i64::MAX as u64) as i64),
        }
    }

    // ── Normalization ──────────────────────────────────────────────

    /// Normalize every operation against the catalog and the policy rules.
    /// Destructive: inherent actions stay destructive regardless of client
    /// hints. Critical: project deletion, any destructive operation fanning
    /// out to two or more targets, or a client upgrade.
    pub fn normalize_operations(
        request: &MutationRequest,
        targets: &[ResolvedTarget],
    ) -> Vec<NormalizedOperation> {
        request
            .operations
            .iter()
            .map(|spec| {
                let mut scopes: BTreeSet<String> = spec
                    .required_scopes
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                for scope in catalog::required_scopes(spec.action) {
                    scopes.insert((*scope).to_string());
                }

                let destructive =
                    spec.action.is_inherently_destructive() || spec.destructive == Some(true);
                let critical = spec.action == Action::ProjectDelete
                    || (destructive && targets.len() >= 2)
                    || spec.critical == Some(true);

                NormalizedOperation {
                    operation_id: spec.operation_id.clone(),
                    action: spec.action,
                    params: spec.params.clone(),
                    required_scopes: scopes.into_iter().collect(),
                    destructive,
                    critical,
                    idempotency_key: spec.idempotency_key.clone(),
                }
            })
            .collect()
    }

    /// The plan fingerprint: canonical hash over actor, mode, targets, the
    /// normalized operations, and the policy tag (the catalog version, so a
    /// catalog bump invalidates old plans).
    pub fn compute_hash(
        actor: &str,
        targets: &[ResolvedTarget],
        operations: &[NormalizedOperation],
    ) -> String {
        let target_projects: Vec<&str> =
            targets.iter().map(|t| t.project_id.as_str()).collect();
        let operations_value =
            serde_json::to_value(operations).unwrap_or_else(|_| json!([]));
        let canonical_input = json!({
            "actor": actor,
            "mode": "preview",
            "target_projects": target_projects,
            "operations": operations_value,
            "policy_tag": catalog::CATALOG_VERSION,
        });
        hash::hash_value(&canonical_input)
    }

    // ── Build and store ────────────────────────────────────────────

    pub fn build_and_store(
        &self,
        request: &MutationRequest,
        targets: &[ResolvedTarget],
    ) -> Plan {
        let operations = Self::normalize_operations(request, targets);
        let plan_hash = Self::compute_hash(&request.actor, targets, &operations);

        let mut required_scopes: BTreeSet<String> = BTreeSet::new();
        for op in &operations {
            required_scopes.extend(op.required_scopes.iter().cloned());
        }
        let destructive_count = operations.iter().filter(|op| op.destructive).count();
        let risk_level = if operations.iter().any(|op| op.critical) {
            RiskLevel::High
        } else if destructive_count > 0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let now = Utc::now();
        let plan = Plan {
            plan_id: format!("plan_{}", uuid::Uuid::new_v4().simple()),
            plan_hash,
            actor: request.actor.clone(),
            target_projects: targets.iter().map(|t| t.project_id.clone()).collect(),
            operations: operations.iter().map(NormalizedOperation::descriptor).collect(),
            required_scopes: required_scopes.into_iter().collect(),
            destructive_count,
            risk_level,
            created_at: now,
            expires_at: now + self.ttl,
        };

        self.plans.lock().insert(plan.plan_id.clone(), plan.clone());
        tracing::debug!(
            plan_id = %plan.plan_id,
            risk = ?plan.risk_level,
            targets = plan.target_projects.len(),
            "plan stored"
        );
        plan
    }

    // ── Verification ───────────────────────────────────────────────

    /// Fetch the stored plan and prove the apply request matches it. Any
    /// missing, unknown, expired, or divergent input fails `PLAN_MISMATCH`.
    pub fn require_matching(
        &self,
        request: &MutationRequest,
        targets: &[ResolvedTarget],
        submitted_plan_id: Option<&str>,
        submitted_hash: Option<&str>,
    ) -> Result<Plan> {
        let (plan_id, submitted_hash) = match (submitted_plan_id, submitted_hash) {
            (Some(id), Some(hash)) if !id.is_empty() && !hash.is_empty() => (id, hash),
            _ => {
                return Err(mismatch(
                    "plan_id and plan_hash are required; run changes.preview first",
                ))
            }
        };

        let plan = self
            .plans
            .lock()
            .get(plan_id)
            .cloned()
            .ok_or_else(|| mismatch(format!("plan \"{plan_id}\" is not known")))?;

        if plan.is_expired(Utc::now()) {
            return Err(mismatch(format!(
                "plan \"{plan_id}\" expired; run changes.preview again"
            )));
        }
        if plan.plan_hash != submitted_hash {
            return Err(mismatch("submitted plan_hash does not match the stored plan"));
        }

        let operations = Self::normalize_operations(request, targets);
        let rebuilt_hash = Self::compute_hash(&request.actor, targets, &operations);
        if rebuilt_hash != plan.plan_hash {
            return Err(mismatch(
                "request does not rehash to the previewed plan; inputs changed since preview",
            ));
        }

        Ok(plan)
    }

    /// Drop expired plans. Returns how many were removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut plans = self.plans.lock();
        let before = plans.len();
        plans.retain(|_, plan| !plan.is_expired(now));
        before - plans.len()
    }

    #[cfg(test)]
    fn stored_count(&self) -> usize {
        self.plans.lock().len()
    }
}

fn mismatch(message: impl Into<String>) -> StandardError {
    StandardError::new(ErrorCode::PlanMismatch, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pw_domain::request::{OperationSpec, TargetSource};
    use serde_json::json;

    fn targets(ids: &[&str]) -> Vec<ResolvedTarget> {
        ids.iter()
            .enumerate()
            .map(|(index, id)| ResolvedTarget {
                index,
                source: TargetSource::Explicit,
                project_id: (*id).to_string(),
            })
            .collect()
    }

    fn request(operations: Vec<OperationSpec>) -> MutationRequest {
        MutationRequest {
            actor: "tester".into(),
            targets: vec![],
            target_selector: None,
            operations,
            transport: None,
            credentials: None,
            plan_id: None,
            plan_hash: None,
            confirmation_token: None,
        }
    }

    fn db_create(params: serde_json::Value) -> OperationSpec {
        OperationSpec::new("op1", Action::DatabaseCreate, params)
    }

    #[test]
    fn hash_is_stable_under_param_key_reorder() {
        let t = targets(&["p1"]);
        let a = request(vec![db_create(json!({"database_id": "db", "name": "Main"}))]);
        let b = request(vec![db_create(json!({"name": "Main", "database_id": "db"}))]);
        let ops_a = PlanManager::normalize_operations(&a, &t);
        let ops_b = PlanManager::normalize_operations(&b, &t);
        assert_eq!(
            PlanManager::compute_hash("tester", &t, &ops_a),
            PlanManager::compute_hash("tester", &t, &ops_b)
        );
    }

    #[test]
    fn hash_changes_when_params_change() {
        let t = targets(&["p1"]);
        let a = request(vec![db_create(json!({"database_id": "db", "name": "Main"}))]);
        let b = request(vec![db_create(json!({"database_id": "db", "name": "Other"}))]);
        let ops_a = PlanManager::normalize_operations(&a, &t);
        let ops_b = PlanManager::normalize_operations(&b, &t);
        assert_ne!(
            PlanManager::compute_hash("tester", &t, &ops_a),
            PlanManager::compute_hash("tester", &t, &ops_b)
        );
    }

    #[test]
    fn catalog_scopes_are_unioned_in() {
        let t = targets(&["p1"]);
        let mut spec = OperationSpec::new(
            "op1",
            Action::UsersCreate,
            json!({"user_id": "u1", "email": "x@y"}),
        );
        spec.required_scopes = Some(vec!["users.read".into()]);
        let ops = PlanManager::normalize_operations(&request(vec![spec]), &t);
        assert_eq!(ops[0].required_scopes, vec!["users.read", "users.write"]);
    }

    #[test]
    fn destructive_hint_cannot_downgrade() {
        let t = targets(&["p1"]);
        let mut spec = OperationSpec::new(
            "op1",
            Action::DatabaseDeleteCollection,
            json!({"database_id": "db", "collection_id": "c"}),
        );
        spec.destructive = Some(false);
        spec.critical = Some(false);
        let ops = PlanManager::normalize_operations(&request(vec![spec]), &t);
        assert!(ops[0].destructive, "inherent destructiveness is kept");
        assert!(!ops[0].critical, "single target stays below critical");
    }

    #[test]
    fn destructive_fanout_upgrades_to_critical() {
        let t = targets(&["p1", "p2"]);
        let spec = OperationSpec::new(
            "op1",
            Action::DatabaseDeleteCollection,
            json!({"database_id": "db", "collection_id": "c"}),
        );
        let ops = PlanManager::normalize_operations(&request(vec![spec]), &t);
        assert!(ops[0].critical);
    }

    #[test]
    fn project_delete_is_always_critical() {
        let t = targets(&["p1"]);
        let spec = OperationSpec::new("op1", Action::ProjectDelete, json!({"project_id": "p1"}));
        let ops = PlanManager::normalize_operations(&request(vec![spec]), &t);
        assert!(ops[0].critical);
    }

    #[test]
    fn client_can_upgrade_to_critical() {
        let t = targets(&["p1"]);
        let mut spec = db_create(json!({"database_id": "db", "name": "Main"}));
        spec.critical = Some(true);
        let ops = PlanManager::normalize_operations(&request(vec![spec]), &t);
        assert!(ops[0].critical);
    }

    #[test]
    fn build_sets_counts_and_risk() {
        let manager = PlanManager::new(600);
        let t = targets(&["p1"]);
        let req = request(vec![db_create(json!({"database_id": "db", "name": "Main"}))]);
        let plan = manager.build_and_store(&req, &t);
        assert_eq!(plan.destructive_count, 0);
        assert_eq!(plan.risk_level, RiskLevel::Low);
        assert_eq!(plan.required_scopes, vec!["databases.write"]);
        assert!(plan.plan_id.starts_with("plan_"));

        let req = request(vec![OperationSpec::new(
            "op2",
            Action::DatabaseDeleteCollection,
            json!({"database_id": "db", "collection_id": "c"}),
        )]);
        let plan = manager.build_and_store(&req, &t);
        assert_eq!(plan.destructive_count, 1);
        assert_eq!(plan.risk_level, RiskLevel::Medium);

        let req = request(vec![OperationSpec::new(
            "op3",
            Action::ProjectDelete,
            json!({"project_id": "p1"}),
        )]);
        let plan = manager.build_and_store(&req, &t);
        assert_eq!(plan.risk_level, RiskLevel::High);
    }

    #[test]
    fn require_matching_round_trip() {
        let manager = PlanManager::new(600);
        let t = targets(&["p1"]);
        let req = request(vec![db_create(json!({"database_id": "db", "name": "Main"}))]);
        let plan = manager.build_and_store(&req, &t);

        let verified = manager
            .require_matching(&req, &t, Some(&plan.plan_id), Some(&plan.plan_hash))
            .unwrap();
        assert_eq!(verified.plan_hash, plan.plan_hash);
    }

    #[test]
    fn missing_ids_fail() {
        let manager = PlanManager::new(600);
        let t = targets(&["p1"]);
        let req = request(vec![db_create(json!({"database_id": "db", "name": "Main"}))]);
        let err = manager.require_matching(&req, &t, None, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::PlanMismatch);
    }

    #[test]
    fn unknown_plan_fails() {
        let manager = PlanManager::new(600);
        let t = targets(&["p1"]);
        let req = request(vec![db_create(json!({"database_id": "db", "name": "Main"}))]);
        let err = manager
            .require_matching(&req, &t, Some("plan_ghost"), Some("h"))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PlanMismatch);
        assert!(err.message.contains("plan_ghost"));
    }

    #[test]
    fn tampered_hash_fails() {
        let manager = PlanManager::new(600);
        let t = targets(&["p1"]);
        let req = request(vec![db_create(json!({"database_id": "db", "name": "Main"}))]);
        let plan = manager.build_and_store(&req, &t);
        let tampered = format!("{}x", plan.plan_hash);
        let err = manager
            .require_matching(&req, &t, Some(&plan.plan_id), Some(&tampered))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PlanMismatch);
    }

    #[test]
    fn changed_request_fails_rehash() {
        let manager = PlanManager::new(600);
        let t = targets(&["p1"]);
        let req = request(vec![db_create(json!({"database_id": "db", "name": "Main"}))]);
        let plan = manager.build_and_store(&req, &t);

        let altered = request(vec![db_create(json!({"database_id": "db", "name": "Evil"}))]);
        let err = manager
            .require_matching(&altered, &t, Some(&plan.plan_id), Some(&plan.plan_hash))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PlanMismatch);
        assert!(err.message.contains("rehash"));
    }

    #[test]
    fn expired_plan_fails_and_sweeps() {
        let manager = PlanManager::new(0);
        let t = targets(&["p1"]);
        let req = request(vec![db_create(json!({"database_id": "db", "name": "Main"}))]);
        let plan = manager.build_and_store(&req, &t);

        let err = manager
            .require_matching(&req, &t, Some(&plan.plan_id), Some(&plan.plan_hash))
            .unwrap_err();
        assert!(err.message.contains("expired"));

        assert_eq!(manager.stored_count(), 1);
        assert_eq!(manager.sweep_expired(Utc::now()), 1);
        assert_eq!(manager.stored_count(), 0);
    }
}
