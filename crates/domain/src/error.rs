//! Standardized error model shared across all ProjectWarden crates.
//!
//! Errors travel as plain records through `Result`, never as panics; the
//! outermost tool boundary is the only place unexpected failures get folded
//! into a generic `INTERNAL_ERROR`.

use serde::{Deserialize, Serialize};

/// Closed set of error codes. Every failure surfaced by the control plane
/// carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    TargetNotFound,
    TargetAmbiguous,
    PlanMismatch,
    CapabilityUnavailable,
    ConfirmRequired,
    InvalidConfirmToken,
    MissingScope,
    AuthContextRequired,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::TargetNotFound => "TARGET_NOT_FOUND",
            ErrorCode::TargetAmbiguous => "TARGET_AMBIGUOUS",
            ErrorCode::PlanMismatch => "PLAN_MISMATCH",
            ErrorCode::CapabilityUnavailable => "CAPABILITY_UNAVAILABLE",
            ErrorCode::ConfirmRequired => "CONFIRM_REQUIRED",
            ErrorCode::InvalidConfirmToken => "INVALID_CONFIRM_TOKEN",
            ErrorCode::MissingScope => "MISSING_SCOPE",
            ErrorCode::AuthContextRequired => "AUTH_CONTEXT_REQUIRED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error record surfaced to clients and recorded in per-operation
/// results. `retryable` reflects whether the same call may succeed if
/// repeated; only upstream failures ever set it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct StandardError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_transports: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl StandardError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            target: None,
            operation_id: None,
            retryable: false,
            missing_scopes: None,
            supported_transports: None,
            remediation: None,
        }
    }

    // ── Convenience constructors ───────────────────────────────────

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    // ── Builder-style field setters ────────────────────────────────

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_missing_scopes(mut self, scopes: Vec<String>) -> Self {
        self.missing_scopes = Some(scopes);
        self
    }

    pub fn with_supported_transports(mut self, transports: Vec<String>) -> Self {
        self.supported_transports = Some(transports);
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }
}

pub type Result<T> = std::result::Result<T, StandardError>;
