//! Upstream execution: header stanza, per-attempt timeout, conditional
//! retry with exponential backoff, and response normalization.
//!
//! The transport is a trait so the loop can be exercised against a scripted
//! fake; [`ReqwestTransport`] is the production implementation.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;

use pw_domain::auth::AuthContext;
use pw_domain::config::HttpConfig;
use pw_domain::error::{Result, StandardError};
use pw_domain::plan::NormalizedOperation;

use crate::request::{build_request, HttpMethod, RequestBody, UpstreamRequest};

/// Value of the `X-Appwrite-Response-Format` header, fixed by the upstream
/// contract.
pub const RESPONSE_FORMAT: &str = "1.8.0";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_statuses: Vec<u16>,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl HttpSettings {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            retry_statuses: config.retry_statuses.clone(),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self::from_config(&HttpConfig::default())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A request ready to leave the process: absolute URL, headers, and body.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl PreparedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("transport: {0}")]
    Transport(String),
}

/// One attempt over the wire. Implementations must be cancel-safe: the
/// client wraps every call in a timeout and drops the future on expiry.
#[async_trait::async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn send(&self, request: &PreparedRequest) -> std::result::Result<HttpResponse, TransportError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reqwest transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        // No client-level timeout: the caller owns the per-attempt deadline.
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn from_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else {
        TransportError::Transport(e.to_string())
    }
}

#[async_trait::async_trait]
impl UpstreamTransport for ReqwestTransport {
    async fn send(&self, request: &PreparedRequest) -> std::result::Result<HttpResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(fields) => {
                let mut form = reqwest::multipart::Form::new();
                for field in fields {
                    form = form.text(field.name.clone(), field.value.clone());
                }
                builder.multipart(form)
            }
        };

        let response = builder.send().await.map_err(from_reqwest)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(from_reqwest)?;
        Ok(HttpResponse { status, body })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct UpstreamClient {
    transport: Arc<dyn UpstreamTransport>,
    settings: HttpSettings,
    allow_legacy_user_update: bool,
}

impl UpstreamClient {
    pub fn new(settings: HttpSettings) -> Self {
        Self::with_transport(Arc::new(ReqwestTransport::new()), settings)
    }

    pub fn with_transport(transport: Arc<dyn UpstreamTransport>, settings: HttpSettings) -> Self {
        Self {
            transport,
            settings,
            allow_legacy_user_update: true,
        }
    }

    pub fn allow_legacy_user_update(mut self, allow: bool) -> Self {
        self.allow_legacy_user_update = allow;
        self
    }

    /// Execute one operation against one project. Request building failures
    /// surface as `VALIDATION_ERROR` without touching the network; upstream
    /// failures normalize to `INTERNAL_ERROR` with `retryable` reflecting
    /// the last trigger.
    pub async fn execute_operation(
        &self,
        target_project_id: &str,
        operation: &NormalizedOperation,
        auth: &AuthContext,
        correlation_id: &str,
    ) -> Result<Value> {
        let request = build_request(
            operation.action,
            &operation.params,
            self.allow_legacy_user_update,
        )?;
        let retryable_request =
            request.method == HttpMethod::Get || operation.idempotency_key.is_some();
        let prepared = self.prepare(request, target_project_id, auth);

        let max_attempts = self.settings.max_retries + 1;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            tracing::debug!(
                action = %operation.action,
                project = %target_project_id,
                correlation_id,
                attempt,
                "dispatching upstream request"
            );

            let message = match tokio::time::timeout(
                self.settings.timeout,
                self.transport.send(&prepared),
            )
            .await
            {
                Err(_) => format!(
                    "upstream request timed out after {}ms",
                    self.settings.timeout.as_millis()
                ),
                Ok(Err(TransportError::Timeout(msg))) => format!("upstream timeout: {msg}"),
                Ok(Err(TransportError::Transport(msg))) => {
                    format!("upstream transport error: {msg}")
                }
                Ok(Ok(response)) => {
                    if (200..300).contains(&response.status) {
                        return Ok(parse_body(&response.body));
                    }
                    let message = upstream_message(response.status, &response.body);
                    if !self.settings.retry_statuses.contains(&response.status) {
                        return Err(StandardError::internal(message).with_retryable(false));
                    }
                    message
                }
            };

            if retryable_request && attempt < max_attempts {
                let delay = backoff_delay(&self.settings, attempt);
                tracing::warn!(
                    action = %operation.action,
                    project = %target_project_id,
                    correlation_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retryable upstream failure, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            return Err(StandardError::internal(message).with_retryable(true));
        }
    }

    fn prepare(
        &self,
        request: UpstreamRequest,
        target_project_id: &str,
        auth: &AuthContext,
    ) -> PreparedRequest {
        let url = format!("{}{}", auth.endpoint.trim_end_matches('/'), request.path);
        let mut headers = vec![
            ("X-Appwrite-Key".to_string(), auth.api_key.clone()),
            (
                "X-Appwrite-Response-Format".to_string(),
                RESPONSE_FORMAT.to_string(),
            ),
        ];
        if !request.body.is_multipart() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        if request.project_header {
            headers.push((
                "X-Appwrite-Project".to_string(),
                target_project_id.to_string(),
            ));
        }
        PreparedRequest {
            method: request.method,
            url,
            query: request.query,
            headers,
            body: request.body,
        }
    }
}

/// 2xx bodies parse as JSON when possible, otherwise wrap as `{raw: body}`.
fn parse_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| serde_json::json!({ "raw": body }))
}

fn upstream_message(status: u16, body: &str) -> String {
    let upstream: Option<String> = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from));
    match upstream {
        Some(message) => format!("Appwrite {status}: {message}"),
        None => format!("Appwrite {status}"),
    }
}

/// Exponential backoff capped at `backoff_max`, plus uniform jitter in
/// [0, base/4). Jitter entropy comes from the wall clock's subsecond nanos;
/// nothing in this crate needs a full RNG.
fn backoff_delay(settings: &HttpSettings, attempt: u32) -> Duration {
    let base_ms = (settings.backoff_base.as_millis() as u64).max(1);
    let max_ms = (settings.backoff_max.as_millis() as u64).max(1);
    let shift = attempt.saturating_sub(1).min(20);
    let exp_ms = base_ms.saturating_mul(1u64 << shift).min(max_ms);
    let jitter_window = base_ms / 4;
    let jitter = if jitter_window == 0 {
        0
    } else {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::from(d.subsec_nanos()))
            .unwrap_or(0);
        nanos % jitter_window
    };
    Duration::from_millis(exp_ms + jitter)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
