//! End-to-end flows through the control service facade with a scripted
//! transport: preview/apply round trips, the destructive-policy gate, plan
//! tampering, scope handling, and the redaction guarantees.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use pw_control::audit::{AuditSink, InMemoryAuditLog};
use pw_control::confirm::ConfirmationService;
use pw_control::ControlService;
use pw_domain::audit::AuditOutcome;
use pw_domain::config::{
    ConfirmationConfig, HttpConfig, ManagementConfig, ProjectConfig, WardenConfig,
};
use pw_domain::error::ErrorCode;
use pw_domain::plan::RiskLevel;
use pw_domain::request::{MutationRequest, OperationSpec, TargetInput};
use pw_domain::response::{ExecutionStatus, OutcomeStatus};
use pw_upstream::{HttpResponse, PreparedRequest, TransportError, UpstreamTransport};

const SECRET: &str = "e2e-secret";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ScriptedTransport {
    script: Mutex<VecDeque<(u16, Value)>>,
    calls: Mutex<Vec<PreparedRequest>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<(u16, Value)>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait::async_trait]
impl UpstreamTransport for ScriptedTransport {
    async fn send(&self, request: &PreparedRequest) -> Result<HttpResponse, TransportError> {
        self.calls.lock().push(request.clone());
        match self.script.lock().pop_front() {
            Some((status, body)) => Ok(HttpResponse {
                status,
                body: body.to_string(),
            }),
            None => Err(TransportError::Transport("script exhausted".into())),
        }
    }
}

fn project(api_key: &str) -> ProjectConfig {
    ProjectConfig {
        api_key: api_key.into(),
        scopes: vec![],
        endpoint: None,
        aliases: vec![],
        default_for_auto: false,
        display_name: None,
    }
}

fn two_project_config() -> WardenConfig {
    let mut projects = HashMap::new();
    projects.insert("p_a".to_string(), project("key-a"));
    projects.insert("p_b".to_string(), project("key-b"));
    WardenConfig {
        default_endpoint: "https://upstream.test/v1".into(),
        projects,
        management: Some(ManagementConfig {
            endpoint: None,
            api_key: "key-console".into(),
            scopes: vec![],
            project_id: Some("console".into()),
        }),
        confirmation: ConfirmationConfig {
            secret: SECRET.into(),
            default_ttl_seconds: 300,
        },
        http: HttpConfig {
            timeout_ms: 1000,
            max_retries: 0,
            backoff_base_ms: 1,
            backoff_max_ms: 1,
            ..HttpConfig::default()
        },
        ..WardenConfig::default()
    }
}

fn service_with(
    config: WardenConfig,
    transport: Arc<ScriptedTransport>,
) -> (ControlService, Arc<InMemoryAuditLog>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pw_control=debug,pw_upstream=debug")
        .with_test_writer()
        .try_init();
    let audit = Arc::new(InMemoryAuditLog::new());
    let service = ControlService::with_parts(config, transport, audit.clone()).unwrap();
    (service, audit)
}

fn db_create_request(targets: Vec<TargetInput>) -> MutationRequest {
    MutationRequest {
        actor: "e2e".into(),
        targets,
        target_selector: None,
        operations: vec![OperationSpec::new(
            "op_db",
            "database.create".parse().unwrap(),
            json!({"database_id": "db-main", "name": "Main DB"}),
        )],
        transport: None,
        credentials: None,
        plan_id: None,
        plan_hash: None,
        confirmation_token: None,
    }
}

fn as_apply(mut request: MutationRequest, plan_id: &str, plan_hash: &str) -> MutationRequest {
    request.plan_id = Some(plan_id.to_string());
    request.plan_hash = Some(plan_hash.to_string());
    request
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn two_target_db_create_succeeds_in_order() {
    let transport = ScriptedTransport::new(vec![
        (201, json!({"$id": "db-main"})),
        (201, json!({"$id": "db-main"})),
    ]);
    let (service, _audit) = service_with(two_project_config(), transport.clone());

    let request = db_create_request(vec![TargetInput::project("p_a"), TargetInput::project("p_b")]);
    let preview = service.changes_preview(&request).unwrap();
    assert_eq!(preview.plan.destructive_count, 0);
    assert_eq!(preview.plan.risk_level, RiskLevel::Low);
    assert_eq!(preview.plan.required_scopes, vec!["databases.write"]);
    assert_eq!(preview.plan.target_projects, vec!["p_a", "p_b"]);

    let apply = service
        .changes_apply(&as_apply(request, &preview.plan.plan_id, &preview.plan.plan_hash))
        .await
        .unwrap();
    assert_eq!(apply.status, ExecutionStatus::Success);
    assert_eq!(apply.target_results.len(), 2);
    for (i, result) in apply.target_results.iter().enumerate() {
        assert_eq!(result.project_id, preview.plan.target_projects[i]);
        assert_eq!(result.status, OutcomeStatus::Success);
    }
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn second_target_failure_is_partial_success() {
    let transport = ScriptedTransport::new(vec![
        (201, json!({"$id": "db-main"})),
        (500, json!({"message": "upstream exploded"})),
    ]);
    let (service, audit) = service_with(two_project_config(), transport.clone());

    let request = db_create_request(vec![TargetInput::project("p_a"), TargetInput::project("p_b")]);
    let preview = service.changes_preview(&request).unwrap();
    let apply = service
        .changes_apply(&as_apply(request, &preview.plan.plan_id, &preview.plan.plan_hash))
        .await
        .unwrap();

    assert_eq!(apply.status, ExecutionStatus::PartialSuccess);
    assert_eq!(apply.target_results[0].status, OutcomeStatus::Success);
    assert_eq!(apply.target_results[1].status, OutcomeStatus::Failed);
    let error = apply.target_results[1].operations[0].error.as_ref().unwrap();
    assert_eq!(error.code, ErrorCode::InternalError);
    assert_eq!(error.message, "Appwrite 500: upstream exploded");

    assert!(audit
        .list()
        .iter()
        .any(|r| r.outcome == AuditOutcome::Failed && r.target_project == "p_b"));
}

#[tokio::test]
async fn critical_delete_requires_confirmation_token() {
    let transport = ScriptedTransport::new(vec![(204, json!({}))]);
    let (service, _audit) = service_with(two_project_config(), transport.clone());

    let request = MutationRequest {
        actor: "e2e".into(),
        targets: vec![TargetInput::project("p_a")],
        target_selector: None,
        operations: vec![OperationSpec::new(
            "op_del",
            "project.delete".parse().unwrap(),
            json!({"project_id": "p_a"}),
        )],
        transport: None,
        credentials: None,
        plan_id: None,
        plan_hash: None,
        confirmation_token: None,
    };
    let preview = service.changes_preview(&request).unwrap();
    assert_eq!(preview.plan.risk_level, RiskLevel::High);

    // Without a token: refused before any dispatch.
    let apply = as_apply(request.clone(), &preview.plan.plan_id, &preview.plan.plan_hash);
    let refused = service.changes_apply(&apply).await.unwrap_err();
    assert_eq!(refused.error.code, ErrorCode::ConfirmRequired);
    assert_eq!(transport.call_count(), 0, "gate must run before dispatch");

    // With a freshly issued token: exactly one dispatch.
    let issued = service.confirm_issue(&preview.plan.plan_hash, None).unwrap();
    let mut confirmed = apply;
    confirmed.confirmation_token = Some(issued.token);
    let response = service.changes_apply(&confirmed).await.unwrap();
    assert_eq!(response.status, ExecutionStatus::Success);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn expired_token_maps_to_confirm_required() {
    let transport = ScriptedTransport::new(vec![]);
    let (service, _audit) = service_with(two_project_config(), transport.clone());

    let request = MutationRequest {
        actor: "e2e".into(),
        targets: vec![TargetInput::project("p_a")],
        target_selector: None,
        operations: vec![OperationSpec::new(
            "op_del",
            "project.delete".parse().unwrap(),
            json!({"project_id": "p_a"}),
        )],
        transport: None,
        credentials: None,
        plan_id: None,
        plan_hash: None,
        confirmation_token: None,
    };
    let preview = service.changes_preview(&request).unwrap();

    // A token signed with the right secret but already past expiry.
    let stale = ConfirmationService::new(SECRET).issue(&preview.plan.plan_hash, 1);
    let mut apply = as_apply(request.clone(), &preview.plan.plan_id, &preview.plan.plan_hash);
    apply.confirmation_token = Some(stale);
    let refused = service.changes_apply(&apply).await.unwrap_err();
    assert_eq!(refused.error.code, ErrorCode::ConfirmRequired);

    // A token from a different secret: invalid signature.
    let forged = ConfirmationService::new("wrong-secret").issue(&preview.plan.plan_hash, i64::MAX);
    apply.confirmation_token = Some(forged);
    let refused = service.changes_apply(&apply).await.unwrap_err();
    assert_eq!(refused.error.code, ErrorCode::InvalidConfirmToken);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn tampered_plan_hash_is_rejected_without_dispatch() {
    let transport = ScriptedTransport::new(vec![]);
    let (service, _audit) = service_with(two_project_config(), transport.clone());

    let request = db_create_request(vec![TargetInput::project("p_a")]);
    let preview = service.changes_preview(&request).unwrap();

    let tampered = format!("{}x", preview.plan.plan_hash);
    let refused = service
        .changes_apply(&as_apply(request, &preview.plan.plan_id, &tampered))
        .await
        .unwrap_err();
    assert_eq!(refused.error.code, ErrorCode::PlanMismatch);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn declared_scopes_cannot_downgrade_catalog() {
    let transport = ScriptedTransport::new(vec![]);
    let (service, _audit) = service_with(two_project_config(), transport);

    let mut op = OperationSpec::new(
        "op_user",
        "auth.users.create".parse().unwrap(),
        json!({"user_id": "u1", "email": "x@y"}),
    );
    op.required_scopes = Some(vec!["users.read".into()]);
    let request = MutationRequest {
        actor: "e2e".into(),
        targets: vec![TargetInput::project("p_a")],
        target_selector: None,
        operations: vec![op],
        transport: None,
        credentials: None,
        plan_id: None,
        plan_hash: None,
        confirmation_token: None,
    };
    let preview = service.changes_preview(&request).unwrap();
    assert!(preview.plan.required_scopes.contains(&"users.read".to_string()));
    assert!(preview.plan.required_scopes.contains(&"users.write".to_string()));
}

#[tokio::test]
async fn missing_targets_and_selector_is_validation_error() {
    let transport = ScriptedTransport::new(vec![]);
    let (service, _audit) = service_with(two_project_config(), transport);

    let request = db_create_request(vec![]);
    let refused = service.changes_preview(&request).unwrap_err();
    assert_eq!(refused.error.code, ErrorCode::ValidationError);
    assert_eq!(refused.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn unsupported_transport_is_capability_unavailable() {
    let transport = ScriptedTransport::new(vec![]);
    let (service, _audit) = service_with(two_project_config(), transport);

    let refused = service.capabilities_list(Some("websocket")).unwrap_err();
    assert_eq!(refused.error.code, ErrorCode::CapabilityUnavailable);
    assert_eq!(
        refused.error.supported_transports.as_deref(),
        Some(&["stdio".to_string(), "http".to_string()][..])
    );

    let mut request = db_create_request(vec![TargetInput::project("p_a")]);
    request.transport = Some("websocket".into());
    let refused = service.changes_preview(&request).unwrap_err();
    assert_eq!(refused.error.code, ErrorCode::CapabilityUnavailable);
}

#[tokio::test]
async fn client_credentials_are_ignored() {
    let transport = ScriptedTransport::new(vec![(201, json!({"$id": "db-main"}))]);
    let (service, _audit) = service_with(two_project_config(), transport.clone());

    let mut request = db_create_request(vec![TargetInput::project("p_a")]);
    request.credentials = Some(json!({"api_key": "sk_client12345678", "endpoint": "https://evil.test"}));
    let preview = service.changes_preview(&request).unwrap();
    let apply = service
        .changes_apply(&as_apply(request, &preview.plan.plan_id, &preview.plan.plan_hash))
        .await
        .unwrap();
    assert_eq!(apply.status, ExecutionStatus::Success);

    let calls = transport.calls.lock();
    assert_eq!(calls[0].header("X-Appwrite-Key"), Some("key-a"));
    assert!(calls[0].url.starts_with("https://upstream.test/v1"));
}

#[tokio::test]
async fn responses_and_audit_never_leak_secrets() {
    let transport = ScriptedTransport::new(vec![(
        200,
        json!({"$id": "db-main", "apiKey": "sk_live1234abcd", "note": "Bearer abc.def"}),
    )]);
    let (service, audit) = service_with(two_project_config(), transport);

    let request = db_create_request(vec![TargetInput::project("p_a")]);
    let preview = service.changes_preview(&request).unwrap();
    let apply = service
        .changes_apply(&as_apply(request, &preview.plan.plan_id, &preview.plan.plan_hash))
        .await
        .unwrap();

    let serialized = serde_json::to_string(&apply).unwrap();
    assert!(!serialized.contains("sk_live1234abcd"));
    assert!(!serialized.contains("Bearer abc"));
    assert!(serialized.contains("[REDACTED]"));

    let audit_serialized = serde_json::to_string(&audit.list()).unwrap();
    assert!(!audit_serialized.contains("sk_live1234abcd"));
}

#[tokio::test]
async fn audit_orders_planned_before_execution() {
    let transport = ScriptedTransport::new(vec![
        (201, json!({"$id": "db-main"})),
        (201, json!({"$id": "db-main"})),
    ]);
    let (service, audit) = service_with(two_project_config(), transport);

    let request = db_create_request(vec![TargetInput::project("p_a"), TargetInput::project("p_b")]);
    let preview = service.changes_preview(&request).unwrap();
    let apply = service
        .changes_apply(&as_apply(request, &preview.plan.plan_id, &preview.plan.plan_hash))
        .await
        .unwrap();

    let records = audit.list();
    let outcomes: Vec<_> = records.iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            AuditOutcome::Planned,
            AuditOutcome::Planned,
            AuditOutcome::Success,
            AuditOutcome::Success
        ]
    );
    assert!(records
        .iter()
        .all(|r| r.correlation_id == apply.correlation_id));
}

#[tokio::test]
async fn dispatch_by_name_round_trip() {
    let transport = ScriptedTransport::new(vec![(201, json!({"$id": "db-main"}))]);
    let (service, _audit) = service_with(two_project_config(), transport);

    let capabilities = service.dispatch("capabilities.list", Value::Null).await;
    assert_eq!(capabilities["capabilities"]["domains"]["project"], true);

    let context = service.dispatch("context.get", Value::Null).await;
    assert_eq!(context["known_project_ids"], json!(["p_a", "p_b"]));

    let catalog = service.dispatch("scopes.catalog.get", Value::Null).await;
    assert_eq!(
        catalog["actions"]["database.create"]["required_scopes"],
        json!(["databases.write"])
    );

    let resolved = service
        .dispatch("targets.resolve", json!({"targets": [{"project_id": "p_a"}]}))
        .await;
    assert_eq!(resolved["source"], "explicit");

    let preview = service
        .dispatch(
            "changes.preview",
            json!({
                "actor": "e2e",
                "targets": [{"project_id": "p_a"}],
                "operations": [{
                    "operation_id": "op_db",
                    "action": "database.create",
                    "params": {"database_id": "db-main", "name": "Main DB"}
                }]
            }),
        )
        .await;
    assert!(preview["plan_id"].as_str().unwrap().starts_with("plan_"));

    let apply = service
        .dispatch(
            "changes.apply",
            json!({
                "actor": "e2e",
                "targets": [{"project_id": "p_a"}],
                "operations": [{
                    "operation_id": "op_db",
                    "action": "database.create",
                    "params": {"database_id": "db-main", "name": "Main DB"}
                }],
                "plan_id": preview["plan_id"],
                "plan_hash": preview["plan_hash"]
            }),
        )
        .await;
    assert_eq!(apply["status"], "SUCCESS");

    let unknown = service.dispatch("nope.nothing", Value::Null).await;
    assert_eq!(unknown["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn idempotent_replay_across_applies() {
    let transport = ScriptedTransport::new(vec![(201, json!({"$id": "db-main"}))]);
    let (service, audit) = service_with(two_project_config(), transport.clone());

    let mut request = db_create_request(vec![TargetInput::project("p_a")]);
    request.operations[0].idempotency_key = Some("replay-1".into());
    let preview = service.changes_preview(&request).unwrap();
    let apply_request = as_apply(request, &preview.plan.plan_id, &preview.plan.plan_hash);

    let first = service.changes_apply(&apply_request).await.unwrap();
    let second = service.changes_apply(&apply_request).await.unwrap();

    assert_eq!(transport.call_count(), 1, "one adapter call for the key");
    assert_eq!(
        first.target_results[0].operations[0].data,
        second.target_results[0].operations[0].data
    );
    assert_eq!(second.status, ExecutionStatus::Success);
    assert!(audit
        .list()
        .iter()
        .any(|r| r.outcome == AuditOutcome::Skipped));
}

#[tokio::test]
async fn production_placeholder_secret_refuses_to_boot() {
    let mut config = two_project_config();
    config.environment = "production".into();
    config.confirmation.secret = "change-me".into();
    let transport = ScriptedTransport::new(vec![]);
    let audit = Arc::new(InMemoryAuditLog::new());
    let result = ControlService::with_parts(config, transport, audit);
    assert!(result.is_err());
    let message = result.err().unwrap().to_string();
    assert!(message.contains("config validation failed"));
}

#[tokio::test]
async fn legacy_user_update_routes_through_apply() {
    let transport = ScriptedTransport::new(vec![(200, json!({"$id": "u_01", "name": "Updated"}))]);
    let (service, _audit) = service_with(two_project_config(), transport.clone());

    let request = MutationRequest {
        actor: "e2e".into(),
        targets: vec![TargetInput::project("p_a")],
        target_selector: None,
        operations: vec![OperationSpec::new(
            "op_user",
            "auth.users.update".parse().unwrap(),
            json!({"user_id": "u_01", "name": "Updated"}),
        )],
        transport: None,
        credentials: None,
        plan_id: None,
        plan_hash: None,
        confirmation_token: None,
    };
    let preview = service.changes_preview(&request).unwrap();
    let apply = service
        .changes_apply(&as_apply(request, &preview.plan.plan_id, &preview.plan.plan_hash))
        .await
        .unwrap();
    assert_eq!(apply.status, ExecutionStatus::Success);

    let calls = transport.calls.lock();
    assert_eq!(calls[0].method.as_str(), "PATCH");
    assert!(calls[0].url.ends_with("/users/u_01/name"));
}
