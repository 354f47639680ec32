//! Configuration schema, loader, and validation.
//!
//! The config is a JSON file consumed at startup. Loading fails with a
//! path-bearing message for a missing, unreadable, or syntactically invalid
//! file; everything else is reported by [`WardenConfig::validate`] so the
//! caller can print every problem at once before aborting.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::auth::AuthContext;
use crate::request::TargetSelector;

/// Sentinel secret shipped in sample configs. Production startup rejects it.
pub const PLACEHOLDER_SECRET: &str = "change-me";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// `development` (default) or `production`. Production tightens the
    /// confirmation-secret check from a warning to a hard error.
    #[serde(default = "d_environment")]
    pub environment: String,
    #[serde(default = "d_endpoint")]
    pub default_endpoint: String,
    #[serde(default)]
    pub projects: HashMap<String, ProjectConfig>,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub management: Option<ManagementConfig>,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub plans: PlanConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub transports: TransportConfig,
    #[serde(default)]
    pub auth: AuthOptions,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            environment: d_environment(),
            default_endpoint: d_endpoint(),
            projects: HashMap::new(),
            defaults: DefaultsConfig::default(),
            management: None,
            confirmation: ConfirmationConfig::default(),
            plans: PlanConfig::default(),
            http: HttpConfig::default(),
            transports: TransportConfig::default(),
            auth: AuthOptions::default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Projects
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub api_key: String,
    /// Scopes declared for the key. Empty means unknown; scope preflight is
    /// skipped and the upstream service is the authority.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Per-project endpoint override; falls back to `default_endpoint`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub default_for_auto: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub auto_target_project_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_selector: Option<TargetSelector>,
}

/// Credentials for the project-management channel (`project.*` actions).
/// When absent, project management is disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub api_key: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Confirmation, plans, transports
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default = "d_secret")]
    pub secret: String,
    #[serde(default = "d_300")]
    pub default_ttl_seconds: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            secret: d_secret(),
            default_ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    #[serde(default = "d_900")]
    pub ttl_seconds: u64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self { ttl_seconds: 900 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "d_transport")]
    pub default: String,
    #[serde(default = "d_transports")]
    pub supported: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default: d_transport(),
            supported: d_transports(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthOptions {
    /// Keep routing the legacy `auth.users.update` alias. When false the
    /// adapter rejects it and names the explicit per-field actions.
    #[serde(default = "d_true")]
    pub allow_legacy_user_update: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            allow_legacy_user_update: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP adapter tuning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "d_10000")]
    pub timeout_ms: u64,
    #[serde(default = "d_2")]
    pub max_retries: u32,
    #[serde(default = "d_retry_statuses")]
    pub retry_statuses: Vec<u16>,
    #[serde(default = "d_250")]
    pub backoff_base_ms: u64,
    #[serde(default = "d_4000")]
    pub backoff_max_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 2,
            retry_statuses: d_retry_statuses(),
            backoff_base_ms: 250,
            backoff_max_ms: 4_000,
        }
    }
}

// ── serde default helpers ─────────────────────────────────────────────

fn d_environment() -> String {
    "development".into()
}
fn d_endpoint() -> String {
    "https://cloud.appwrite.io/v1".into()
}
fn d_secret() -> String {
    PLACEHOLDER_SECRET.into()
}
fn d_transport() -> String {
    "stdio".into()
}
fn d_transports() -> Vec<String> {
    vec!["stdio".into(), "http".into()]
}
fn d_retry_statuses() -> Vec<u16> {
    vec![408, 425, 429, 500, 502, 503, 504]
}
fn d_true() -> bool {
    true
}
fn d_300() -> u64 {
    300
}
fn d_900() -> u64 {
    900
}
fn d_10000() -> u64 {
    10_000
}
fn d_250() -> u64 {
    250
}
fn d_4000() -> u64 {
    4_000
}
fn d_2() -> u32 {
    2
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl WardenConfig {
    /// Load and parse the JSON config file. Missing file, unreadable file,
    /// and invalid JSON each fail with the offending path in the message.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!("config file {} does not exist", path.display());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let config: WardenConfig = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    // ── Derived views ──────────────────────────────────────────────

    /// Known project ids, sorted for determinism.
    pub fn known_project_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.projects.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// alias -> project_id. On duplicate aliases the lexicographically first
    /// project wins; `validate` reports the shadowing.
    pub fn alias_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for id in self.known_project_ids() {
            for alias in &self.projects[&id].aliases {
                map.entry(alias.clone()).or_insert_with(|| id.clone());
            }
        }
        map
    }

    /// Auto-target list: the explicit default list, else every project
    /// flagged `default_for_auto`, sorted.
    pub fn auto_target_project_ids(&self) -> Vec<String> {
        if !self.defaults.auto_target_project_ids.is_empty() {
            return self.defaults.auto_target_project_ids.clone();
        }
        self.known_project_ids()
            .into_iter()
            .filter(|id| self.projects[id].default_for_auto)
            .collect()
    }

    /// Per-project auth context, endpoint falling back to the default.
    pub fn auth_context_for(&self, project_id: &str) -> Option<AuthContext> {
        let project = self.projects.get(project_id)?;
        let endpoint = project
            .endpoint
            .clone()
            .unwrap_or_else(|| self.default_endpoint.clone());
        Some(AuthContext::new(endpoint, project.api_key.clone()).with_scopes(project.scopes.clone()))
    }

    /// Management auth context, when the channel is configured.
    pub fn management_context(&self) -> Option<AuthContext> {
        let mgmt = self.management.as_ref()?;
        let endpoint = mgmt
            .endpoint
            .clone()
            .unwrap_or_else(|| self.default_endpoint.clone());
        Some(AuthContext::new(endpoint, mgmt.api_key.clone()).with_scopes(mgmt.scopes.clone()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn error(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Error,
        field: field.into(),
        message: message.into(),
    }
}

fn warning(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Warning,
        field: field.into(),
        message: message.into(),
    }
}

fn valid_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl WardenConfig {
    /// Validate the configuration and return every issue found.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();

        if !valid_url(&self.default_endpoint) {
            issues.push(error(
                "default_endpoint",
                format!(
                    "must start with http:// or https:// (got \"{}\")",
                    self.default_endpoint
                ),
            ));
        }

        // ── Projects ──────────────────────────────────────────────
        if self.projects.is_empty() {
            issues.push(error("projects", "at least one project must be configured"));
        }

        let ids = self.known_project_ids();
        let mut alias_owner: HashMap<&str, &str> = HashMap::new();
        for id in &ids {
            let project = &self.projects[id];
            if project.api_key.is_empty() {
                issues.push(error(
                    format!("projects.{id}.api_key"),
                    "api_key must not be empty",
                ));
            }
            if let Some(endpoint) = &project.endpoint {
                if !valid_url(endpoint) {
                    issues.push(error(
                        format!("projects.{id}.endpoint"),
                        format!("must start with http:// or https:// (got \"{endpoint}\")"),
                    ));
                }
            }
            for alias in &project.aliases {
                if alias.is_empty() {
                    issues.push(error(
                        format!("projects.{id}.aliases"),
                        "aliases must not be empty strings",
                    ));
                    continue;
                }
                if let Some(owner) = alias_owner.get(alias.as_str()) {
                    issues.push(warning(
                        format!("projects.{id}.aliases"),
                        format!("alias \"{alias}\" already maps to project \"{owner}\""),
                    ));
                } else {
                    alias_owner.insert(alias.as_str(), id.as_str());
                }
            }
        }

        // ── Defaults ──────────────────────────────────────────────
        for (i, id) in self.defaults.auto_target_project_ids.iter().enumerate() {
            if !self.projects.contains_key(id) {
                issues.push(error(
                    format!("defaults.auto_target_project_ids[{i}]"),
                    format!("references unknown project \"{id}\""),
                ));
            }
        }
        if let Some(selector) = &self.defaults.target_selector {
            use crate::request::SelectorMode;
            for (i, value) in selector.values.iter().enumerate() {
                let known = match selector.mode {
                    SelectorMode::ProjectId => self.projects.contains_key(value),
                    SelectorMode::Alias => alias_owner.contains_key(value.as_str()),
                    SelectorMode::Auto => true,
                };
                if !known {
                    issues.push(error(
                        format!("defaults.target_selector.values[{i}]"),
                        format!("references unknown target \"{value}\""),
                    ));
                }
            }
        }

        // ── Management ────────────────────────────────────────────
        if let Some(mgmt) = &self.management {
            if mgmt.api_key.is_empty() {
                issues.push(error("management.api_key", "api_key must not be empty"));
            }
            if let Some(endpoint) = &mgmt.endpoint {
                if !valid_url(endpoint) {
                    issues.push(error(
                        "management.endpoint",
                        format!("must start with http:// or https:// (got \"{endpoint}\")"),
                    ));
                }
            }
        }

        // ── Confirmation secret ───────────────────────────────────
        let secret_weak =
            self.confirmation.secret.is_empty() || self.confirmation.secret == PLACEHOLDER_SECRET;
        if secret_weak {
            if self.is_production() {
                issues.push(error(
                    "confirmation.secret",
                    "production requires a non-default confirmation secret",
                ));
            } else {
                issues.push(warning(
                    "confirmation.secret",
                    "using the placeholder confirmation secret (fine for development only)",
                ));
            }
        }

        // ── Plans / HTTP ──────────────────────────────────────────
        if self.plans.ttl_seconds == 0 {
            issues.push(error("plans.ttl_seconds", "must be greater than 0"));
        }
        if self.http.timeout_ms == 0 {
            issues.push(error("http.timeout_ms", "must be greater than 0"));
        }
        if self.http.backoff_base_ms == 0 {
            issues.push(error("http.backoff_base_ms", "must be greater than 0"));
        }

        // ── Transports ────────────────────────────────────────────
        if self.transports.supported.is_empty() {
            issues.push(error(
                "transports.supported",
                "at least one transport must be supported",
            ));
        } else if !self.transports.supported.contains(&self.transports.default) {
            issues.push(error(
                "transports.default",
                format!(
                    "default transport \"{}\" is not in the supported list",
                    self.transports.default
                ),
            ));
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
