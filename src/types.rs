use std::{cmp::Ordering, fmt, str::FromStr, time::Duration};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

fn default_true() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to parse configuration YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Treats an explicit `null` list like a missing one.
pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts RFC 3339 strings, naive ISO timestamps (assumed UTC) and epoch
/// milliseconds.
pub(crate) fn flexible_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Millis(ms)) => Ok(Utc.timestamp_millis_opt(ms).single()),
        Some(Raw::Text(text)) => parse_timestamp(&text)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {text}"))),
    }
}

pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Orders newer timestamps first; missing timestamps sort last.
pub(crate) fn newest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// `225` becomes `"3:45"`.
pub fn format_duration(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConversationStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub step: String,
    pub prompt: String,
    #[serde(default = "default_true")]
    pub required: bool,
    pub order: u32,
}

impl ConversationStep {
    pub fn new(step: impl Into<String>, prompt: impl Into<String>, required: bool) -> Self {
        Self {
            id: None,
            step: step.into(),
            prompt: prompt.into(),
            required,
            order: 0,
        }
    }
}

/// A named call script: greeting, objective, ordered steps, fallback lines
/// and the conditions under which the agent hangs up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub agent_name: String,
    pub greeting: String,
    pub primary_objective: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    #[schemars(with = "Vec<ConversationStep>")]
    pub conversation_flow: Vec<ConversationStep>,
    #[serde(default, deserialize_with = "null_as_empty")]
    #[schemars(with = "Vec<String>")]
    pub fallback_responses: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    #[schemars(with = "Vec<String>")]
    pub call_ending_conditions: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(
        default,
        deserialize_with = "flexible_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<DateTime<Utc>>")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "flexible_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<DateTime<Utc>>")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AgentConfiguration {
    pub fn from_yaml_str(input: &str) -> Result<Self, DocumentError> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, DocumentError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Sets every step's `order` to its 1-based position.
    pub fn renumber_steps(&mut self) {
        for (index, step) in self.conversation_flow.iter_mut().enumerate() {
            step.order = index as u32 + 1;
        }
    }

    pub fn logistics_template() -> Self {
        let steps = [
            ("Greeting", "Introduce yourself and explain the purpose of the call", true),
            ("Load Confirmation", "Confirm the load number and delivery details", true),
            ("Address Verification", "Verify the delivery address is correct", true),
            ("Issue Resolution", "Address any concerns or issues mentioned", false),
            ("Closing", "Thank the driver and confirm next steps", true),
        ];

        let mut config = Self {
            id: None,
            agent_name: "Logistics Assistant".into(),
            greeting: "Hello, this is your logistics assistant calling about your delivery."
                .into(),
            primary_objective: "Confirm delivery details and address any concerns.".into(),
            conversation_flow: steps
                .iter()
                .map(|(step, prompt, required)| ConversationStep::new(*step, *prompt, *required))
                .collect(),
            fallback_responses: vec![
                "I apologize, but I didn't catch that. Could you please repeat?".into(),
                "I'm having trouble understanding. Let me try to rephrase.".into(),
                "Could you please speak a bit louder or more clearly?".into(),
            ],
            call_ending_conditions: vec![
                "Driver confirms all details".into(),
                "Driver requests callback".into(),
                "Call duration exceeds 5 minutes".into(),
                "Driver hangs up".into(),
            ],
            is_active: true,
            created_at: None,
            updated_at: None,
        };
        config.renumber_steps();
        config
    }
}

/// An agent as reported by the voice provider. Never mutated locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_published: Option<bool>,
    #[serde(
        default,
        deserialize_with = "flexible_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modification_timestamp: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn display_name(&self) -> &str {
        self.agent_name.as_deref().unwrap_or(&self.agent_id)
    }

    pub fn publication_status(&self) -> String {
        if let Some(status) = self.status.as_deref().filter(|s| !s.trim().is_empty()) {
            return status.to_ascii_lowercase();
        }
        match self.is_published {
            Some(true) => "published".into(),
            Some(false) => "draft".into(),
            None => "unknown".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Scheduled,
    #[serde(alias = "in-progress")]
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl CallStatus {
    pub const ALL: [CallStatus; 6] = [
        CallStatus::Pending,
        CallStatus::Scheduled,
        CallStatus::InProgress,
        CallStatus::Completed,
        CallStatus::Failed,
        CallStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::Scheduled => "scheduled",
            CallStatus::InProgress => "in_progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Cancelled => "cancelled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CallStatus::Pending => "Pending",
            CallStatus::Scheduled => "Scheduled",
            CallStatus::InProgress => "In Progress",
            CallStatus::Completed => "Completed",
            CallStatus::Failed => "Failed",
            CallStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown call status: {0}")]
pub struct UnknownCallStatus(pub String);

impl FromStr for CallStatus {
    type Err = UnknownCallStatus;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        CallStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| UnknownCallStatus(input.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub call_id: String,
    pub driver_name: String,
    pub phone_number: String,
    pub load_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<String>,
    pub status: CallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_config_id: Option<i64>,
    #[serde(
        default,
        deserialize_with = "flexible_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

impl CallRecord {
    pub fn duration_label(&self) -> String {
        self.duration_seconds
            .map(format_duration)
            .unwrap_or_else(|| "-".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallTrigger {
    pub driver_name: String,
    pub phone_number: String,
    pub load_number: String,
    pub agent_config_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_delivery_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceCallTrigger {
    pub driver_name: String,
    pub load_number: String,
    pub agent_config_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_delivery_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retell_call_id: Option<String>,
    pub status: CallStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStatusUpdate {
    pub status: CallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_summary: Option<Map<String, Value>>,
}

impl CallStatusUpdate {
    pub fn new(status: CallStatus) -> Self {
        Self {
            status,
            duration_seconds: None,
            transcript: None,
            structured_summary: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebCallRequest {
    pub agent_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebCallResponse {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_call_url: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WebCallResponse {
    /// The explicit token, or the `access_token` query parameter of the web
    /// call URL when the backend only returned the URL.
    pub fn access_token(&self) -> Option<String> {
        if let Some(token) = self.access_token.as_deref().filter(|t| !t.trim().is_empty()) {
            return Some(token.to_string());
        }
        let url = reqwest::Url::parse(self.web_call_url.as_deref()?).ok()?;
        let token = url
            .query_pairs()
            .find(|(key, _)| key == "access_token")
            .map(|(_, value)| value.into_owned());
        token.filter(|t| !t.is_empty())
    }

    pub fn to_access_token(&self) -> AccessToken {
        let mut token = AccessToken::new(self.access_token().unwrap_or_default());
        token.call_id = self.call_id.clone();
        token
    }
}

/// Short-lived credential for joining one web call.
#[derive(Clone, PartialEq)]
pub struct AccessToken {
    value: String,
    pub call_id: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("call_id", &self.call_id)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            call_id: None,
            issued_at: Utc::now(),
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at;
        self
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_blank(&self) -> bool {
        self.value.trim().is_empty()
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        Utc::now() - self.issued_at > ttl
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// List endpoints answer either with a bare array or with the array wrapped
/// in an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Listing<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(alias = "configurations", alias = "calls", alias = "agents")]
        data: Vec<T>,
    },
}

impl<T> Listing<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Bare(items) => items,
            Listing::Wrapped { data } => data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub speaker: String,
    pub text: String,
}

impl TranscriptLine {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSummary {
    pub load_confirmed: bool,
    pub address_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub issues: Vec<String>,
    pub next_steps: String,
    pub driver_satisfaction: String,
}

/// A finished (or running) call with its transcript, as shown in the
/// results view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    #[serde(flatten)]
    pub record: CallRecord,
    pub agent: String,
    pub summary: CallSummary,
    pub transcript: Vec<TranscriptLine>,
}
