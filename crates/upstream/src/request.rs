//! Pure request building: `(action, params)` to an upstream request
//! description. No network here; every required path or body parameter is
//! validated before the caller spends a connection.

use serde_json::Value;

use pw_domain::action::{Action, UserField};
use pw_domain::error::{Result, StandardError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request description
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// One field of a multipart form (the deployment upload contract).
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(Vec<MultipartField>),
}

impl RequestBody {
    pub fn is_multipart(&self) -> bool {
        matches!(self, RequestBody::Multipart(_))
    }
}

/// A fully described upstream request, still independent of any endpoint or
/// credential. `project_header` is false only for `project.*` actions.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub project_header: bool,
}

impl UpstreamRequest {
    fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            project_header: true,
        }
    }

    fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    fn without_project_header(mut self) -> Self {
        self.project_header = false;
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Param extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn missing_param(action: Action, key: &str) -> StandardError {
    StandardError::validation(format!(
        "action {action} requires param \"{key}\""
    ))
}

fn require_str<'a>(params: &'a Value, key: &str, action: Action) -> Result<&'a str> {
    match params.get(key).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(missing_param(action, key)),
    }
}

fn require_present<'a>(params: &'a Value, key: &str, action: Action) -> Result<&'a Value> {
    params.get(key).ok_or_else(|| missing_param(action, key))
}

/// Scalar params become query string pairs; nested values are ignored.
fn scalar_query(params: &Value) -> Vec<(String, String)> {
    let Some(map) = params.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key.clone(), rendered))
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User update routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Field-inference order for the legacy `auth.users.update` alias. First
/// param present with the right shape wins.
const INFERENCE_ORDER: [UserField; 10] = [
    UserField::Email,
    UserField::Name,
    UserField::Status,
    UserField::Password,
    UserField::Phone,
    UserField::EmailVerification,
    UserField::PhoneVerification,
    UserField::Mfa,
    UserField::Labels,
    UserField::Prefs,
];

fn field_param_matches(field: UserField, value: &Value) -> bool {
    match field {
        UserField::Email | UserField::Name | UserField::Password | UserField::Phone => {
            value.is_string()
        }
        UserField::Status => value.is_string() || value.is_boolean(),
        UserField::EmailVerification | UserField::PhoneVerification | UserField::Mfa => {
            value.is_boolean()
        }
        UserField::Labels => value.is_array(),
        UserField::Prefs => value.is_object(),
    }
}

fn infer_user_field(params: &Value) -> Option<UserField> {
    INFERENCE_ORDER.into_iter().find(|field| {
        params
            .get(field.as_str())
            .map(|v| field_param_matches(*field, v))
            .unwrap_or(false)
    })
}

fn user_field_request(field: UserField, user_id: &str, params: &Value, action: Action) -> Result<UpstreamRequest> {
    let value = require_present(params, field.as_str(), action)?.clone();
    let (method, segment, body_key) = match field {
        UserField::Email => (HttpMethod::Patch, "email", "email"),
        UserField::Name => (HttpMethod::Patch, "name", "name"),
        UserField::Status => (HttpMethod::Patch, "status", "status"),
        UserField::Password => (HttpMethod::Patch, "password", "password"),
        // The phone endpoint takes the value under `number`.
        UserField::Phone => (HttpMethod::Patch, "phone", "number"),
        UserField::EmailVerification => (HttpMethod::Patch, "verification", "emailVerification"),
        UserField::PhoneVerification => {
            (HttpMethod::Patch, "verification/phone", "phoneVerification")
        }
        UserField::Mfa => (HttpMethod::Patch, "mfa", "mfa"),
        UserField::Labels => (HttpMethod::Put, "labels", "labels"),
        UserField::Prefs => (HttpMethod::Patch, "prefs", "prefs"),
    };
    let mut body = serde_json::Map::new();
    body.insert(body_key.to_string(), value);
    Ok(
        UpstreamRequest::new(method, format!("/users/{user_id}/{segment}"))
            .json(Value::Object(body)),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Translate an action and its params into a request description.
/// `allow_legacy_user_update` gates the inferred `auth.users.update` alias.
pub fn build_request(
    action: Action,
    params: &Value,
    allow_legacy_user_update: bool,
) -> Result<UpstreamRequest> {
    match action {
        // ── Projects (management channel, no project header) ──────
        Action::ProjectCreate => Ok(UpstreamRequest::new(HttpMethod::Post, "/projects")
            .json(params.clone())
            .without_project_header()),
        Action::ProjectDelete => {
            let project_id = require_str(params, "project_id", action)?;
            Ok(
                UpstreamRequest::new(HttpMethod::Delete, format!("/projects/{project_id}"))
                    .without_project_header(),
            )
        }

        // ── Databases ─────────────────────────────────────────────
        Action::DatabaseList => Ok(UpstreamRequest::new(HttpMethod::Get, "/databases")
            .with_query(scalar_query(params))),
        Action::DatabaseCreate => {
            require_str(params, "database_id", action)?;
            require_str(params, "name", action)?;
            Ok(UpstreamRequest::new(HttpMethod::Post, "/databases").json(params.clone()))
        }
        Action::DatabaseUpsertCollection => {
            let database_id = require_str(params, "database_id", action)?;
            match params.get("collection_id").and_then(Value::as_str) {
                Some(collection_id) if !collection_id.is_empty() => Ok(UpstreamRequest::new(
                    HttpMethod::Put,
                    format!("/databases/{database_id}/collections/{collection_id}"),
                )
                .json(params.clone())),
                _ => Ok(UpstreamRequest::new(
                    HttpMethod::Post,
                    format!("/databases/{database_id}/collections"),
                )
                .json(params.clone())),
            }
        }
        Action::DatabaseDeleteCollection => {
            let database_id = require_str(params, "database_id", action)?;
            let collection_id = require_str(params, "collection_id", action)?;
            Ok(UpstreamRequest::new(
                HttpMethod::Delete,
                format!("/databases/{database_id}/collections/{collection_id}"),
            ))
        }

        // ── Users ─────────────────────────────────────────────────
        Action::UsersList => {
            Ok(UpstreamRequest::new(HttpMethod::Get, "/users").with_query(scalar_query(params)))
        }
        Action::UsersCreate => {
            require_str(params, "user_id", action)?;
            Ok(UpstreamRequest::new(HttpMethod::Post, "/users").json(params.clone()))
        }
        Action::UsersUpdateField(field) => {
            let user_id = require_str(params, "user_id", action)?;
            user_field_request(field, user_id, params, action)
        }
        Action::UsersUpdate => {
            if !allow_legacy_user_update {
                return Err(StandardError::validation(
                    "auth.users.update is disabled; use the explicit \
                     auth.users.update.<field> actions",
                ));
            }
            let user_id = require_str(params, "user_id", action)?;
            let field = infer_user_field(params).ok_or_else(|| {
                StandardError::validation(
                    "auth.users.update could not infer a field to update from params",
                )
            })?;
            user_field_request(field, user_id, params, action)
        }

        // ── Functions ─────────────────────────────────────────────
        Action::FunctionList => {
            Ok(UpstreamRequest::new(HttpMethod::Get, "/functions").with_query(scalar_query(params)))
        }
        Action::FunctionCreate => {
            require_str(params, "function_id", action)?;
            Ok(UpstreamRequest::new(HttpMethod::Post, "/functions").json(params.clone()))
        }
        Action::FunctionUpdate => {
            let function_id = require_str(params, "function_id", action)?;
            Ok(
                UpstreamRequest::new(HttpMethod::Put, format!("/functions/{function_id}"))
                    .json(params.clone()),
            )
        }
        Action::DeploymentTrigger => {
            let function_id = require_str(params, "function_id", action)?;
            let code = require_str(params, "code", action)?;
            let mut fields = vec![MultipartField {
                name: "code".into(),
                value: code.to_string(),
            }];
            for optional in ["activate", "entrypoint", "commands"] {
                if let Some(value) = params.get(optional) {
                    let rendered = match value {
                        Value::String(s) => s.clone(),
                        Value::Bool(b) => b.to_string(),
                        Value::Number(n) => n.to_string(),
                        _ => continue,
                    };
                    fields.push(MultipartField {
                        name: optional.into(),
                        value: rendered,
                    });
                }
            }
            let mut request = UpstreamRequest::new(
                HttpMethod::Post,
                format!("/functions/{function_id}/deployments"),
            );
            request.body = RequestBody::Multipart(fields);
            Ok(request)
        }
        Action::ExecutionTrigger => {
            let function_id = require_str(params, "function_id", action)?;
            Ok(UpstreamRequest::new(
                HttpMethod::Post,
                format!("/functions/{function_id}/executions"),
            )
            .json(params.clone()))
        }
        Action::ExecutionStatus => {
            let function_id = require_str(params, "function_id", action)?;
            let execution_id = require_str(params, "execution_id", action)?;
            Ok(UpstreamRequest::new(
                HttpMethod::Get,
                format!("/functions/{function_id}/executions/{execution_id}"),
            ))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
