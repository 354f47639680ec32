//! Mutation execution: sequential per-target, per-operation dispatch with
//! auth resolution, scope preflight, idempotency caching, audit emission,
//! and status aggregation. Deterministic ordering is the point; targets run
//! in resolved order and `target_results[i]` always matches
//! `target_projects[i]`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use pw_domain::audit::{AuditOutcome, AuditRecord};
use pw_domain::auth::AuthContext;
use pw_domain::error::{ErrorCode, StandardError};
use pw_domain::plan::NormalizedOperation;
use pw_domain::request::ResolvedTarget;
use pw_domain::response::{ExecutionStatus, OperationResult, OutcomeStatus, TargetResult};
use pw_upstream::UpstreamClient;

use crate::audit::AuditSink;
use crate::redact::Redactor;

pub struct MutationExecutor {
    adapter: Arc<UpstreamClient>,
    project_auth: Option<HashMap<String, AuthContext>>,
    fallback_auth: Option<AuthContext>,
    management_auth: Option<AuthContext>,
    redactor: Redactor,
    audit: Arc<dyn AuditSink>,
    idempotency: Mutex<HashMap<String, OperationResult>>,
}

impl MutationExecutor {
    pub fn new(
        adapter: Arc<UpstreamClient>,
        project_auth: Option<HashMap<String, AuthContext>>,
        fallback_auth: Option<AuthContext>,
        management_auth: Option<AuthContext>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            adapter,
            project_auth,
            fallback_auth,
            management_auth,
            redactor: Redactor::new(),
            audit,
            idempotency: Mutex::new(HashMap::new()),
        }
    }

    /// Execute every operation against every target, in order. Emits the
    /// `planned` audit entries for the whole batch first, then one entry per
    /// executed operation.
    pub async fn execute(
        &self,
        actor: &str,
        targets: &[ResolvedTarget],
        operations: &[NormalizedOperation],
        correlation_id: &str,
    ) -> (ExecutionStatus, Vec<TargetResult>) {
        for target in targets {
            for op in operations {
                self.audit.append(AuditRecord::new(
                    actor,
                    &target.project_id,
                    &op.operation_id,
                    AuditOutcome::Planned,
                    correlation_id,
                ));
            }
        }

        let mut target_results = Vec::with_capacity(targets.len());
        for target in targets {
            let result = self
                .execute_target(actor, target, operations, correlation_id)
                .await;
            target_results.push(result);
        }

        let succeeded = target_results
            .iter()
            .filter(|t| t.status == OutcomeStatus::Success)
            .count();
        let status = if succeeded == target_results.len() {
            ExecutionStatus::Success
        } else if succeeded == 0 {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::PartialSuccess
        };
        (status, target_results)
    }

    async fn execute_target(
        &self,
        actor: &str,
        target: &ResolvedTarget,
        operations: &[NormalizedOperation],
        correlation_id: &str,
    ) -> TargetResult {
        let project_id = target.project_id.as_str();
        tracing::info!(project = project_id, correlation_id, "executing target");

        // Preflight: a usable auth context for this project.
        let auth = match &self.project_auth {
            Some(map) => map.get(project_id).cloned(),
            None => self.fallback_auth.clone(),
        };
        let auth = match auth.filter(AuthContext::is_complete) {
            Some(auth) => auth,
            None => {
                let results = operations
                    .iter()
                    .map(|op| {
                        let error = auth_context_required(project_id, &op.operation_id);
                        self.record_failure(actor, project_id, op, &error, correlation_id);
                        OperationResult::failure(&op.operation_id, op.action, error)
                    })
                    .collect();
                return TargetResult {
                    project_id: project_id.to_string(),
                    status: OutcomeStatus::Failed,
                    operations: results,
                };
            }
        };

        let mut results = Vec::with_capacity(operations.len());
        for op in operations {
            let result = self
                .execute_operation(actor, project_id, op, &auth, correlation_id)
                .await;
            results.push(result);
        }

        let status = if results.iter().all(|r| r.status == OutcomeStatus::Success) {
            OutcomeStatus::Success
        } else {
            OutcomeStatus::Failed
        };
        TargetResult {
            project_id: project_id.to_string(),
            status,
            operations: results,
        }
    }

    async fn execute_operation(
        &self,
        actor: &str,
        project_id: &str,
        op: &NormalizedOperation,
        auth: &AuthContext,
        correlation_id: &str,
    ) -> OperationResult {
        // Project-management actions run under the management context.
        let auth = if op.action.is_project_management() {
            match &self.management_auth {
                Some(mgmt) => mgmt,
                None => {
                    let error = StandardError::new(
                        ErrorCode::CapabilityUnavailable,
                        format!("{} requires the project-management channel", op.action),
                    )
                    .with_target(project_id)
                    .with_operation_id(&op.operation_id)
                    .with_remediation("configure the management section to enable project.* actions");
                    self.record_failure(actor, project_id, op, &error, correlation_id);
                    return OperationResult::failure(&op.operation_id, op.action, error);
                }
            }
        } else {
            auth
        };

        // Scope preflight. An empty declared set means the key's scopes are
        // unknown; the upstream service is the authority then.
        let available = auth.scope_set();
        if !available.is_empty() {
            let missing: Vec<String> = op
                .required_scopes
                .iter()
                .filter(|scope| !available.contains(scope.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                let error = StandardError::new(
                    ErrorCode::MissingScope,
                    format!(
                        "api key for \"{project_id}\" lacks scopes required by {}",
                        op.action
                    ),
                )
                .with_target(project_id)
                .with_operation_id(&op.operation_id)
                .with_missing_scopes(missing.clone())
                .with_remediation(format!(
                    "grant the key these scopes: {}",
                    missing.join(", ")
                ));
                self.record_failure(actor, project_id, op, &error, correlation_id);
                return OperationResult::failure(&op.operation_id, op.action, error);
            }
        }

        // Idempotency replay.
        let cache_key = op
            .idempotency_key
            .as_ref()
            .map(|key| format!("{project_id}:{}:{key}", op.action));
        if let Some(cache_key) = &cache_key {
            if let Some(cached) = self.idempotency.lock().get(cache_key).cloned() {
                tracing::debug!(
                    project = project_id,
                    operation = %op.operation_id,
                    "idempotency cache hit, skipping dispatch"
                );
                self.audit.append(AuditRecord::new(
                    actor,
                    project_id,
                    &op.operation_id,
                    AuditOutcome::Skipped,
                    correlation_id,
                ));
                return cached;
            }
        }

        // Dispatch.
        match self
            .adapter
            .execute_operation(project_id, op, auth, correlation_id)
            .await
        {
            Ok(data) => {
                let data = self.redactor.redact_value(&data);
                let result = OperationResult::success(&op.operation_id, op.action, data);
                if let Some(cache_key) = cache_key {
                    self.idempotency.lock().insert(cache_key, result.clone());
                }
                self.audit.append(AuditRecord::new(
                    actor,
                    project_id,
                    &op.operation_id,
                    AuditOutcome::Success,
                    correlation_id,
                ));
                result
            }
            Err(mut error) => {
                error.message = self.redactor.redact_message(&error.message);
                if error.target.is_none() {
                    error.target = Some(project_id.to_string());
                }
                if error.operation_id.is_none() {
                    error.operation_id = Some(op.operation_id.clone());
                }
                self.record_failure(actor, project_id, op, &error, correlation_id);
                OperationResult::failure(&op.operation_id, op.action, error)
            }
        }
    }

    fn record_failure(
        &self,
        actor: &str,
        project_id: &str,
        op: &NormalizedOperation,
        error: &StandardError,
        correlation_id: &str,
    ) {
        tracing::warn!(
            project = project_id,
            operation = %op.operation_id,
            code = %error.code,
            correlation_id,
            "operation failed"
        );
        self.audit.append(
            AuditRecord::new(
                actor,
                project_id,
                &op.operation_id,
                AuditOutcome::Failed,
                correlation_id,
            )
            .with_details(json!({
                "code": error.code,
                "message": self.redactor.redact_message(&error.message),
            })),
        );
    }
}

fn auth_context_required(project_id: &str, operation_id: &str) -> StandardError {
    StandardError::new(
        ErrorCode::AuthContextRequired,
        format!("no usable auth context for project \"{project_id}\""),
    )
    .with_target(project_id)
    .with_operation_id(operation_id)
    .with_remediation(format!(
        "configure endpoint and api_key for project \"{project_id}\""
    ))
}
