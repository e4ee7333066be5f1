use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Error returned by every backend call.
///
/// A status of `0` means no response was received at all (connection refused,
/// timeout, DNS failure); any other value is the HTTP status the backend sent.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    pub body: Option<Value>,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            status,
            message: message.into(),
            body,
        }
    }

    pub fn network(error: impl fmt::Display) -> Self {
        Self::new(0, format!("Network error: {error}"), None)
    }

    /// Builds the error for a non-2xx response from its raw body text.
    pub fn from_response(status: u16, text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(body) => {
                let message = detail_message(&body)
                    .unwrap_or_else(|| format!("HTTP error! status: {status}"));
                Self::new(status, message, Some(body))
            }
            Err(_) => {
                let body = (!text.is_empty()).then(|| Value::String(text.to_string()));
                Self::new(status, format!("HTTP error! status: {status}"), body)
            }
        }
    }

    pub fn is_network(&self) -> bool {
        self.status == 0
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

// FastAPI-style bodies carry either a string `detail` or a list of
// `{ loc, msg, type }` validation entries.
fn detail_message(body: &Value) -> Option<String> {
    match body.get("detail")? {
        Value::String(detail) => Some(detail.clone()),
        Value::Array(entries) => {
            let messages: Vec<String> = entries
                .iter()
                .filter_map(|entry| {
                    let msg = entry.get("msg")?.as_str()?;
                    let field = entry
                        .get("loc")
                        .and_then(Value::as_array)
                        .and_then(|loc| loc.last())
                        .and_then(Value::as_str);
                    Some(match field {
                        Some(field) => format!("{field}: {msg}"),
                        None => msg.to_string(),
                    })
                })
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        other => Some(other.to_string()),
    }
}

/// Field-level validation failures, keyed by the wire name of the field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn fields(&self) -> Vec<&str> {
        self.errors.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.errors.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect();
        write!(f, "invalid input ({})", parts.join(", "))
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detail_string_becomes_message() {
        let error = ApiError::from_response(404, r#"{"detail":"Agent configuration not found"}"#);
        assert_eq!(error.status, 404);
        assert_eq!(error.message, "Agent configuration not found");
        assert_eq!(error.body, Some(json!({"detail": "Agent configuration not found"})));
        assert!(error.is_not_found());
    }

    #[test]
    fn validation_detail_entries_are_joined() {
        let body = r#"{"detail":[
            {"loc":["body","driver_name"],"msg":"field required","type":"value_error.missing"},
            {"loc":["body","phone_number"],"msg":"too short","type":"value_error"}
        ]}"#;
        let error = ApiError::from_response(422, body);
        assert_eq!(error.message, "driver_name: field required; phone_number: too short");
    }

    #[test]
    fn non_json_body_falls_back_to_status_message() {
        let error = ApiError::from_response(502, "Bad Gateway");
        assert_eq!(error.message, "HTTP error! status: 502");
        assert_eq!(error.body, Some(Value::String("Bad Gateway".into())));
    }

    #[test]
    fn network_errors_have_zero_status() {
        let error = ApiError::network("connection refused");
        assert!(error.is_network());
        assert_eq!(error.message, "Network error: connection refused");
        assert!(error.body.is_none());
    }

    #[test]
    fn validation_errors_keep_first_message_per_field() {
        let mut errors = ValidationErrors::new();
        errors.add("driver_name", "Driver name is required");
        errors.add("driver_name", "ignored");
        errors.add("load_number", "Load number is required");
        assert_eq!(errors.fields(), vec!["driver_name", "load_number"]);
        assert_eq!(errors.get("driver_name"), Some("Driver name is required"));
        assert!(errors.into_result().is_err());
    }
}
