use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    api::{ApiClient, DEFAULT_PAGE_SIZE},
    error::{ApiError, ValidationErrors},
    types::{newest_first, CallRecord, CallTrigger, TriggerResponse, VoiceCallTrigger},
};

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[\d\s\-\(\)]+$").expect("phone pattern compiles"));

pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_PATTERN.is_match(phone)
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
    #[error(transparent)]
    Api(#[from] ApiError),
}

fn optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn require(errors: &mut ValidationErrors, field: &str, value: &str, message: &str) {
    if value.trim().is_empty() {
        errors.add(field, message);
    }
}

fn require_config(errors: &mut ValidationErrors, agent_config_id: Option<i64>) -> i64 {
    match agent_config_id {
        Some(id) => id,
        None => {
            errors.add("agent_config_id", "Select an agent configuration");
            0
        }
    }
}

/// Outbound phone call request as typed by the operator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallTriggerForm {
    pub agent_config_id: Option<i64>,
    pub driver_name: String,
    pub phone_number: String,
    pub load_number: String,
    pub delivery_address: String,
    pub expected_delivery_time: String,
    pub special_instructions: String,
}

impl CallTriggerForm {
    /// Returns the request to send, or every missing or malformed field.
    pub fn validate(&self) -> Result<CallTrigger, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let agent_config_id = require_config(&mut errors, self.agent_config_id);
        require(&mut errors, "driver_name", &self.driver_name, "Driver name is required");
        if self.phone_number.trim().is_empty() {
            errors.add("phone_number", "Phone number is required");
        } else if !is_valid_phone(self.phone_number.trim()) {
            errors.add("phone_number", "Please enter a valid phone number");
        }
        require(&mut errors, "load_number", &self.load_number, "Load number is required");
        errors.into_result()?;

        Ok(CallTrigger {
            driver_name: self.driver_name.trim().to_string(),
            phone_number: self.phone_number.trim().to_string(),
            load_number: self.load_number.trim().to_string(),
            agent_config_id,
            delivery_address: optional(&self.delivery_address),
            expected_delivery_time: optional(&self.expected_delivery_time),
            special_instructions: optional(&self.special_instructions),
        })
    }
}

/// Browser voice call request; the driver talks through the web client, so
/// no phone number is needed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceCallForm {
    pub agent_config_id: Option<i64>,
    pub driver_name: String,
    pub load_number: String,
    pub delivery_address: String,
    pub expected_delivery_time: String,
    pub special_instructions: String,
}

impl VoiceCallForm {
    pub fn validate(&self) -> Result<VoiceCallTrigger, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let agent_config_id = require_config(&mut errors, self.agent_config_id);
        require(&mut errors, "driver_name", &self.driver_name, "Driver name is required");
        require(&mut errors, "load_number", &self.load_number, "Load number is required");
        errors.into_result()?;

        Ok(VoiceCallTrigger {
            driver_name: self.driver_name.trim().to_string(),
            load_number: self.load_number.trim().to_string(),
            agent_config_id,
            delivery_address: optional(&self.delivery_address),
            expected_delivery_time: optional(&self.expected_delivery_time),
            special_instructions: optional(&self.special_instructions),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerStatus {
    Idle,
    Calling,
    Succeeded(TriggerResponse),
    Failed(String),
}

pub struct CallTriggerPanel {
    history: Vec<CallRecord>,
    status: TriggerStatus,
    banner: Option<String>,
    history_limit: u32,
}

impl Default for CallTriggerPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl CallTriggerPanel {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            status: TriggerStatus::Idle,
            banner: None,
            history_limit: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn history(&self) -> &[CallRecord] {
        &self.history
    }

    pub fn status(&self) -> &TriggerStatus {
        &self.status
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub async fn reload_history(&mut self, api: &ApiClient) -> Result<&[CallRecord], ApiError> {
        match api.list_calls(self.history_limit, 0).await {
            Ok(mut calls) => {
                calls.sort_by(|a, b| newest_first(a.created_at, b.created_at));
                self.history = calls;
                Ok(&self.history)
            }
            Err(error) => {
                self.banner = Some(format!("Failed to load call history: {}", error.message));
                Err(error)
            }
        }
    }

    /// Validates the form, POSTs it once and refreshes the history. A
    /// failed history refresh does not fail the submission.
    pub async fn submit(
        &mut self,
        api: &ApiClient,
        form: &CallTriggerForm,
    ) -> Result<TriggerResponse, TriggerError> {
        let request = form.validate()?;
        self.begin();
        let outcome = api.trigger_call(&request).await;
        self.finish(api, outcome).await
    }

    pub async fn submit_voice(
        &mut self,
        api: &ApiClient,
        form: &VoiceCallForm,
    ) -> Result<TriggerResponse, TriggerError> {
        let request = form.validate()?;
        self.begin();
        let outcome = api.trigger_voice_call(&request).await;
        self.finish(api, outcome).await
    }

    fn begin(&mut self) {
        self.status = TriggerStatus::Calling;
        self.banner = None;
    }

    async fn finish(
        &mut self,
        api: &ApiClient,
        outcome: Result<TriggerResponse, ApiError>,
    ) -> Result<TriggerResponse, TriggerError> {
        match outcome {
            Ok(response) => {
                info!(call_id = %response.call_id, status = %response.status, "call triggered");
                self.status = TriggerStatus::Succeeded(response.clone());
                if let Err(error) = self.reload_history(api).await {
                    warn!(%error, "call history refresh failed after trigger");
                }
                Ok(response)
            }
            Err(error) => {
                self.status = TriggerStatus::Failed(error.message.clone());
                self.banner = Some(format!("Failed to start call: {}", error.message));
                Err(error.into())
            }
        }
    }

    pub fn reset(&mut self) {
        self.status = TriggerStatus::Idle;
        self.banner = None;
    }
}
