//! Auth context value type. Immutable once built from configuration;
//! referenced from multiple targets without copying concerns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Credentials and endpoint for one upstream project (or the management
/// console). `scopes` is the set declared for the API key; an empty set
/// means the key's scopes are unknown and preflight is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub endpoint: String,
    pub api_key: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl AuthContext {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            scopes: Vec::new(),
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Both endpoint and api_key must be present before any dispatch.
    pub fn is_complete(&self) -> bool {
        !self.endpoint.is_empty() && !self.api_key.is_empty()
    }

    /// Declared scopes as a set for preflight difference computation.
    pub fn scope_set(&self) -> BTreeSet<&str> {
        self.scopes.iter().map(String::as_str).collect()
    }
}
