//! Secret scrubbing for everything that leaves the core: error messages,
//! audit details, and successful operation data. Structure is never altered;
//! only offending values are replaced.

use regex::Regex;
use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

/// Compiled redaction patterns. Construct once and share; the patterns are
/// static and compilation cannot fail at runtime.
pub struct Redactor {
    key_pattern: Regex,
    value_patterns: Vec<Regex>,
}

impl Redactor {
    pub fn new() -> Self {
        Self {
            key_pattern: Regex::new(r"(?i)(token|secret|api[_-]?key|password|credential|authorization)")
                .expect("static key pattern"),
            value_patterns: vec![
                Regex::new(r"(?i)sk_[a-z0-9]{8,}").expect("static sk pattern"),
                Regex::new(r"(?i)bearer\s+[a-z0-9._-]+").expect("static bearer pattern"),
            ],
        }
    }

    /// Scrub a nested value. Mapping values under a secret-bearing key and
    /// string values matching a secret pattern become `[REDACTED]`.
    pub fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let redacted = map
                    .iter()
                    .map(|(key, inner)| {
                        if self.key_pattern.is_match(key) {
                            (key.clone(), Value::String(REDACTED.into()))
                        } else {
                            (key.clone(), self.redact_value(inner))
                        }
                    })
                    .collect();
                Value::Object(redacted)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.redact_value(item)).collect())
            }
            Value::String(s) => {
                if self.value_patterns.iter().any(|p| p.is_match(s)) {
                    Value::String(REDACTED.into())
                } else {
                    value.clone()
                }
            }
            scalar => scalar.clone(),
        }
    }

    /// Scrub a free-form message, replacing matched spans in place.
    pub fn redact_message(&self, message: &str) -> String {
        let mut out = message.to_string();
        for pattern in &self.value_patterns {
            out = pattern.replace_all(&out, REDACTED).into_owned();
        }
        out
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secret_keys_are_scrubbed() {
        let redactor = Redactor::new();
        let value = json!({
            "api_key": "abc123",
            "apiKey": "abc123",
            "password": "hunter2",
            "authorization": "Basic xyz",
            "name": "visible",
            "nested": { "client_secret": "shh", "count": 3 }
        });
        let redacted = redactor.redact_value(&value);
        assert_eq!(redacted["api_key"], REDACTED);
        assert_eq!(redacted["apiKey"], REDACTED);
        assert_eq!(redacted["password"], REDACTED);
        assert_eq!(redacted["authorization"], REDACTED);
        assert_eq!(redacted["name"], "visible");
        assert_eq!(redacted["nested"]["client_secret"], REDACTED);
        assert_eq!(redacted["nested"]["count"], 3);
    }

    #[test]
    fn secret_looking_strings_are_scrubbed() {
        let redactor = Redactor::new();
        let value = json!({
            "note": "sk_live1234abcd is the key",
            "header": "Bearer abc.def-ghi",
            "fine": "sk_short"
        });
        let redacted = redactor.redact_value(&value);
        assert_eq!(redacted["note"], REDACTED);
        assert_eq!(redacted["header"], REDACTED);
        assert_eq!(redacted["fine"], "sk_short", "under 8 chars is not a key");
    }

    #[test]
    fn structure_is_preserved() {
        let redactor = Redactor::new();
        let value = json!({"a": [1, {"token": "t"}], "b": null});
        let redacted = redactor.redact_value(&value);
        assert!(redacted["a"].is_array());
        assert_eq!(redacted["a"][0], 1);
        assert_eq!(redacted["a"][1]["token"], REDACTED);
        assert!(redacted["b"].is_null());
    }

    #[test]
    fn messages_redact_in_place() {
        let redactor = Redactor::new();
        let message = "upstream rejected key sk_live1234abcd (Bearer abc123)";
        let redacted = redactor.redact_message(message);
        assert_eq!(
            redacted,
            format!("upstream rejected key {REDACTED} ({REDACTED})")
        );
    }

    #[test]
    fn clean_messages_pass_through() {
        let redactor = Redactor::new();
        assert_eq!(redactor.redact_message("plain failure"), "plain failure");
    }
}
