//! The control service facade: the seven tool operations, wired over the
//! resolver, plan manager, confirmation service, executor, and audit log.
//! One correlation id is minted per invocation and threaded through every
//! response and audit entry it produces.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use pw_domain::auth::AuthContext;
use pw_domain::catalog;
use pw_domain::config::{ConfigSeverity, WardenConfig};
use pw_domain::error::{ErrorCode, StandardError};
use pw_domain::request::{MutationRequest, TargetInput, TargetSelector};
use pw_domain::response::{
    ApplyResponse, Capabilities, CapabilitiesResponse, CatalogEntry, CatalogResponse,
    ConfirmIssueResponse, ContextResponse, DomainFlags, MutationErrorResponse, PreviewResponse,
    ResolveResponse,
};
use pw_upstream::{HttpSettings, ReqwestTransport, UpstreamClient, UpstreamTransport};

use crate::audit::{AuditSink, InMemoryAuditLog};
use crate::confirm::{ConfirmationService, VerifyOutcome};
use crate::executor::MutationExecutor;
use crate::plan::PlanManager;
use crate::redact::Redactor;
use crate::resolver::TargetResolver;

pub struct ControlService {
    config: WardenConfig,
    resolver: TargetResolver,
    plans: PlanManager,
    confirm: ConfirmationService,
    executor: MutationExecutor,
    audit: Arc<dyn AuditSink>,
    redactor: Redactor,
}

impl ControlService {
    /// Boot with the production transport and an in-memory audit log.
    pub fn new(config: WardenConfig) -> anyhow::Result<Self> {
        Self::with_parts(
            config,
            Arc::new(ReqwestTransport::new()),
            Arc::new(InMemoryAuditLog::new()),
        )
    }

    /// Validate the config, then wire every subsystem. This is the single
    /// boot path; tests inject a scripted transport and their own sink.
    pub fn with_parts(
        config: WardenConfig,
        transport: Arc<dyn UpstreamTransport>,
        audit: Arc<dyn AuditSink>,
    ) -> anyhow::Result<Self> {
        let issues = config.validate();
        for issue in &issues {
            match issue.severity {
                ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
                ConfigSeverity::Error => tracing::error!("config: {issue}"),
            }
        }
        let error_count = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .count();
        if error_count > 0 {
            anyhow::bail!("config validation failed with {error_count} error(s)");
        }

        let adapter = Arc::new(
            UpstreamClient::with_transport(transport, HttpSettings::from_config(&config.http))
                .allow_legacy_user_update(config.auth.allow_legacy_user_update),
        );
        let project_auth: HashMap<String, AuthContext> = config
            .known_project_ids()
            .into_iter()
            .filter_map(|id| config.auth_context_for(&id).map(|ctx| (id, ctx)))
            .collect();
        let executor = MutationExecutor::new(
            adapter,
            Some(project_auth),
            None,
            config.management_context(),
            audit.clone(),
        );
        let resolver = TargetResolver::from_config(&config);
        let plans = PlanManager::new(config.plans.ttl_seconds);
        let confirm = ConfirmationService::new(&config.confirmation.secret);

        tracing::info!(
            projects = config.projects.len(),
            management = config.management.is_some(),
            environment = %config.environment,
            "control service ready"
        );
        Ok(Self {
            config,
            resolver,
            plans,
            confirm,
            executor,
            audit,
            redactor: Redactor::new(),
        })
    }

    pub fn audit_log(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    // ── Shared helpers ─────────────────────────────────────────────

    fn new_correlation_id() -> String {
        format!("corr_{}", uuid::Uuid::new_v4().simple())
    }

    /// Every outgoing error message passes through the redactor.
    fn fail(&self, correlation_id: &str, mut error: StandardError) -> MutationErrorResponse {
        error.message = self.redactor.redact_message(&error.message);
        MutationErrorResponse::new(correlation_id, error)
    }

    fn check_transport(&self, transport: Option<&str>) -> Result<(), StandardError> {
        let Some(transport) = transport else {
            return Ok(());
        };
        if self
            .config
            .transports
            .supported
            .iter()
            .any(|t| t.as_str() == transport)
        {
            return Ok(());
        }
        Err(StandardError::new(
            ErrorCode::CapabilityUnavailable,
            format!("transport \"{transport}\" is not supported"),
        )
        .with_supported_transports(self.config.transports.supported.clone())
        .with_remediation(format!(
            "use one of: {}",
            self.config.transports.supported.join(", ")
        )))
    }

    fn validate_mutation_request(&self, request: &MutationRequest) -> Result<(), StandardError> {
        if request.actor.trim().is_empty() {
            return Err(StandardError::validation("actor must not be empty"));
        }
        if request.operations.is_empty() {
            return Err(StandardError::validation("operations must not be empty"));
        }
        let mut seen = HashSet::new();
        for (i, op) in request.operations.iter().enumerate() {
            if op.operation_id.is_empty() {
                return Err(StandardError::validation(format!(
                    "operations[{i}].operation_id must not be empty"
                )));
            }
            if !seen.insert(op.operation_id.as_str()) {
                return Err(StandardError::validation(format!(
                    "duplicate operation_id \"{}\"",
                    op.operation_id
                )));
            }
            if let Some(domain) = op.domain {
                if domain != op.action.domain() {
                    return Err(StandardError::validation(format!(
                        "operations[{i}] declares domain {} but action {} belongs to {}",
                        domain.as_str(),
                        op.action,
                        op.action.domain().as_str()
                    )));
                }
            }
        }
        if request.targets.is_empty()
            && request.target_selector.is_none()
            && self.resolver.default_selector().is_none()
        {
            return Err(StandardError::validation(
                "either targets or target_selector must be provided",
            ));
        }
        if request.credentials.is_some() {
            // Security invariant: process configuration is the only
            // credential source.
            tracing::warn!("client-supplied credentials are ignored");
        }
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Tool operations
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn capabilities_list(
        &self,
        transport: Option<&str>,
    ) -> Result<CapabilitiesResponse, MutationErrorResponse> {
        let correlation_id = Self::new_correlation_id();
        if let Err(error) = self.check_transport(transport) {
            return Err(self.fail(&correlation_id, error));
        }
        let capabilities = Capabilities {
            domains: DomainFlags {
                project: self.config.management.is_some(),
                database: true,
                auth: true,
                function: true,
                operation: true,
            },
            transport_default: self.config.transports.default.clone(),
            supported_transports: self.config.transports.supported.clone(),
            auto_targeting_enabled: self.resolver.auto_targeting_enabled(),
            scope_catalog_version: catalog::CATALOG_VERSION.to_string(),
        };
        Ok(CapabilitiesResponse {
            summary: format!(
                "{} transport(s); project management {}",
                capabilities.supported_transports.len(),
                if capabilities.domains.project {
                    "enabled"
                } else {
                    "disabled"
                }
            ),
            correlation_id,
            capabilities,
        })
    }

    pub fn context_get(&self) -> ContextResponse {
        let correlation_id = Self::new_correlation_id();
        let known_project_ids = self.config.known_project_ids();
        let alias_count = self.config.alias_map().len();
        ContextResponse {
            summary: format!(
                "{} project(s) configured, {} alias(es)",
                known_project_ids.len(),
                alias_count
            ),
            correlation_id,
            known_project_ids,
            alias_count,
            auto_target_project_ids: self.config.auto_target_project_ids(),
            default_target_selector: self.config.defaults.target_selector.clone(),
        }
    }

    pub fn targets_resolve(
        &self,
        targets: &[TargetInput],
        selector: Option<&TargetSelector>,
    ) -> Result<ResolveResponse, MutationErrorResponse> {
        let correlation_id = Self::new_correlation_id();
        match self.resolver.resolve(targets, selector) {
            Ok((resolved_targets, source)) => Ok(ResolveResponse {
                summary: format!("resolved {} target(s)", resolved_targets.len()),
                correlation_id,
                resolved_targets,
                source,
            }),
            Err(error) => Err(self.fail(&correlation_id, error)),
        }
    }

    pub fn scopes_catalog_get(&self) -> CatalogResponse {
        let correlation_id = Self::new_correlation_id();
        let actions: BTreeMap<String, CatalogEntry> = catalog::entries()
            .into_iter()
            .map(|(action, scopes)| {
                (
                    action.as_str().to_string(),
                    CatalogEntry {
                        required_scopes: scopes.iter().map(|s| (*s).to_string()).collect(),
                    },
                )
            })
            .collect();
        CatalogResponse {
            summary: format!("{} action(s) in catalog {}", actions.len(), catalog::CATALOG_VERSION),
            correlation_id,
            catalog_version: catalog::CATALOG_VERSION.to_string(),
            actions,
        }
    }

    pub fn changes_preview(
        &self,
        request: &MutationRequest,
    ) -> Result<PreviewResponse, MutationErrorResponse> {
        let correlation_id = Self::new_correlation_id();
        self.plans.sweep_expired(Utc::now());

        if let Err(error) = self.validate_mutation_request(request) {
            return Err(self.fail(&correlation_id, error));
        }
        if let Err(error) = self.check_transport(request.transport.as_deref()) {
            return Err(self.fail(&correlation_id, error));
        }
        let (targets, _source) = match self
            .resolver
            .resolve(&request.targets, request.target_selector.as_ref())
        {
            Ok(resolved) => resolved,
            Err(error) => return Err(self.fail(&correlation_id, error)),
        };

        let plan = self.plans.build_and_store(request, &targets);
        Ok(PreviewResponse {
            summary: format!(
                "planned {} operation(s) across {} project(s); risk {}",
                plan.operations.len(),
                plan.target_projects.len(),
                plan.risk_level.as_str()
            ),
            correlation_id,
            plan,
        })
    }

    pub async fn changes_apply(
        &self,
        request: &MutationRequest,
    ) -> Result<ApplyResponse, MutationErrorResponse> {
        let correlation_id = Self::new_correlation_id();

        if let Err(error) = self.validate_mutation_request(request) {
            return Err(self.fail(&correlation_id, error));
        }
        if let Err(error) = self.check_transport(request.transport.as_deref()) {
            return Err(self.fail(&correlation_id, error));
        }
        let (targets, _source) = match self
            .resolver
            .resolve(&request.targets, request.target_selector.as_ref())
        {
            Ok(resolved) => resolved,
            Err(error) => return Err(self.fail(&correlation_id, error)),
        };

        let plan = match self.plans.require_matching(
            request,
            &targets,
            request.plan_id.as_deref(),
            request.plan_hash.as_deref(),
        ) {
            Ok(plan) => plan,
            Err(error) => return Err(self.fail(&correlation_id, error)),
        };

        // Destructive-policy gate: critical plans need a live confirmation
        // token bound to this plan's hash. Nothing dispatches before this.
        if plan.is_critical() {
            let now_unix = Utc::now().timestamp();
            let gate_error = match request.confirmation_token.as_deref() {
                None => Some(StandardError::new(
                    ErrorCode::ConfirmRequired,
                    "critical operations require a confirmation token",
                )
                .with_remediation(format!(
                    "call confirm.issue with plan_hash {}",
                    plan.plan_hash
                ))),
                Some(token) => match self.confirm.verify(token, &plan.plan_hash, now_unix) {
                    VerifyOutcome::Ok => None,
                    VerifyOutcome::Expired => Some(StandardError::new(
                        ErrorCode::ConfirmRequired,
                        "confirmation token expired",
                    )
                    .with_remediation("issue a fresh token via confirm.issue")),
                    VerifyOutcome::Invalid => Some(StandardError::new(
                        ErrorCode::InvalidConfirmToken,
                        "confirmation token signature is invalid",
                    )),
                    VerifyOutcome::Mismatch => Some(StandardError::new(
                        ErrorCode::InvalidConfirmToken,
                        "confirmation token is bound to a different plan",
                    )),
                },
            };
            if let Some(error) = gate_error {
                return Err(self.fail(&correlation_id, error));
            }
        }

        let operations = PlanManager::normalize_operations(request, &targets);
        let (status, target_results) = self
            .executor
            .execute(&request.actor, &targets, &operations, &correlation_id)
            .await;

        Ok(ApplyResponse {
            summary: format!(
                "applied {} operation(s) across {} target(s): {}",
                operations.len(),
                target_results.len(),
                status.as_str()
            ),
            correlation_id,
            status,
            plan_id: plan.plan_id,
            plan_hash: plan.plan_hash,
            target_results,
        })
    }

    pub fn confirm_issue(
        &self,
        plan_hash: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<ConfirmIssueResponse, MutationErrorResponse> {
        let correlation_id = Self::new_correlation_id();
        if plan_hash.is_empty()
            || plan_hash.len() % 2 != 0
            || !plan_hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(self.fail(
                &correlation_id,
                StandardError::validation("plan_hash must be a non-empty hex string"),
            ));
        }
        let ttl = ttl_seconds
            .unwrap_or(self.config.confirmation.default_ttl_seconds)
            .clamp(30, 7200);
        let expires_at = Utc::now().timestamp() + ttl as i64;
        let token = self.confirm.issue(plan_hash, expires_at);
        Ok(ConfirmIssueResponse {
            summary: format!("confirmation token valid for {ttl}s"),
            correlation_id,
            token,
            expires_at,
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // By-name dispatch for the framing layer
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Dispatch a tool call by name. Always returns a serializable value:
    /// either the tool's success payload or a `MutationErrorResponse`.
    pub async fn dispatch(&self, tool: &str, params: Value) -> Value {
        match tool {
            "capabilities.list" => {
                #[derive(Deserialize)]
                struct Args {
                    transport: Option<String>,
                }
                match parse_args::<Args>(params) {
                    Ok(args) => to_value(self.capabilities_list(args.transport.as_deref())),
                    Err(resp) => to_json(&resp),
                }
            }
            "context.get" => to_json(&self.context_get()),
            "targets.resolve" => {
                #[derive(Deserialize)]
                struct Args {
                    #[serde(default)]
                    targets: Vec<TargetInput>,
                    target_selector: Option<TargetSelector>,
                }
                match parse_args::<Args>(params) {
                    Ok(args) => {
                        to_value(self.targets_resolve(&args.targets, args.target_selector.as_ref()))
                    }
                    Err(resp) => to_json(&resp),
                }
            }
            "scopes.catalog.get" => to_json(&self.scopes_catalog_get()),
            "changes.preview" => match parse_args::<MutationRequest>(params) {
                Ok(request) => to_value(self.changes_preview(&request)),
                Err(resp) => to_json(&resp),
            },
            "changes.apply" => match parse_args::<MutationRequest>(params) {
                Ok(request) => to_value(self.changes_apply(&request).await),
                Err(resp) => to_json(&resp),
            },
            "confirm.issue" => {
                #[derive(Deserialize)]
                struct Args {
                    plan_hash: String,
                    ttl_seconds: Option<u64>,
                }
                match parse_args::<Args>(params) {
                    Ok(args) => to_value(self.confirm_issue(&args.plan_hash, args.ttl_seconds)),
                    Err(resp) => to_json(&resp),
                }
            }
            other => to_json(&MutationErrorResponse::new(
                Self::new_correlation_id(),
                StandardError::validation(format!("unknown tool \"{other}\"")),
            )),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(
    params: Value,
) -> Result<T, MutationErrorResponse> {
    // Tools invoked without arguments arrive as null.
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| {
        MutationErrorResponse::new(
            ControlService::new_correlation_id(),
            StandardError::validation(format!("invalid arguments: {e}")),
        )
    })
}

fn to_value<T: serde::Serialize>(result: Result<T, MutationErrorResponse>) -> Value {
    match result {
        Ok(payload) => to_json(&payload),
        Err(error) => to_json(&error),
    }
}

/// The outermost boundary: a response that cannot serialize becomes a
/// generic retryable internal error instead of a panic.
fn to_json<T: serde::Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or_else(|e| {
        serde_json::json!({
            "correlation_id": ControlService::new_correlation_id(),
            "status": "FAILED",
            "summary": "internal serialization failure",
            "error": {
                "code": "INTERNAL_ERROR",
                "message": format!("response serialization failed: {e}"),
                "retryable": true,
            }
        })
    })
}
