use std::{env, fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::session::vocabulary::EventVocabulary;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";

/// Upper bound on automatic join retries after a transient transport failure.
pub const MAX_TRANSPORT_RETRIES: u32 = 1;

fn default_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_fallback_connect_ms() -> u64 {
    3_000
}

fn default_connection_poll_ms() -> u64 {
    500
}

fn default_join_timeout_ms() -> u64 {
    10_000
}

fn default_max_transport_retries() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    1_000
}

fn default_token_ttl_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ApiSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Timing knobs of the web call session manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// How long to wait in `connecting` for a start signal before assuming
    /// the call is up.
    #[serde(default = "default_fallback_connect_ms")]
    pub fallback_connect_ms: u64,
    #[serde(default = "default_connection_poll_ms")]
    pub connection_poll_ms: u64,
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    #[serde(default = "default_max_transport_retries")]
    pub max_transport_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary: Option<EventVocabulary>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            fallback_connect_ms: default_fallback_connect_ms(),
            connection_poll_ms: default_connection_poll_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            max_transport_retries: default_max_transport_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            token_ttl_secs: default_token_ttl_secs(),
            vocabulary: None,
        }
    }
}

impl SessionSettings {
    pub fn fallback_connect(&self) -> Duration {
        Duration::from_millis(self.fallback_connect_ms)
    }

    pub fn connection_poll(&self) -> Duration {
        Duration::from_millis(self.connection_poll_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Join retries a session may spend, never more than
    /// [`MAX_TRANSPORT_RETRIES`].
    pub fn transport_retries(&self) -> u32 {
        self.max_transport_retries.min(MAX_TRANSPORT_RETRIES)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn vocabulary(&self) -> EventVocabulary {
        self.vocabulary.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsoleSettings {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

impl ConsoleSettings {
    pub fn from_yaml_str(input: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_yaml::from_str(input)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Reads the optional settings file, then applies `VOICEDESK_*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env(&mut self) -> Result<(), SettingsError> {
        if let Ok(url) = env::var("VOICEDESK_API_URL") {
            self.api.base_url = url;
        }
        if let Ok(timeout_ms) = env::var("VOICEDESK_REQUEST_TIMEOUT_MS") {
            self.api.request_timeout_ms = parse_ms("VOICEDESK_REQUEST_TIMEOUT_MS", &timeout_ms)?;
        }
        if let Ok(fallback_ms) = env::var("VOICEDESK_FALLBACK_CONNECT_MS") {
            self.session.fallback_connect_ms =
                parse_ms("VOICEDESK_FALLBACK_CONNECT_MS", &fallback_ms)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.api.base_url.trim().is_empty() {
            return Err(SettingsError::Invalid("api.base_url must not be empty".into()));
        }
        if self.api.request_timeout_ms == 0 {
            return Err(SettingsError::Invalid("api.request_timeout_ms must be > 0".into()));
        }
        let session = &self.session;
        for (name, value) in [
            ("session.fallback_connect_ms", session.fallback_connect_ms),
            ("session.connection_poll_ms", session.connection_poll_ms),
            ("session.join_timeout_ms", session.join_timeout_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::Invalid(format!("{name} must be > 0")));
            }
        }
        if session.max_transport_retries > MAX_TRANSPORT_RETRIES {
            return Err(SettingsError::Invalid(format!(
                "session.max_transport_retries must be at most {MAX_TRANSPORT_RETRIES}"
            )));
        }
        Ok(())
    }
}

fn parse_ms(name: &str, value: &str) -> Result<u64, SettingsError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| SettingsError::Invalid(format!("{name} must be a number of milliseconds")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_console() {
        let settings = ConsoleSettings::default();
        assert_eq!(settings.api.base_url, "http://localhost:8000/api/v1");
        assert_eq!(settings.api.request_timeout(), Duration::from_secs(30));
        assert_eq!(settings.session.fallback_connect(), Duration::from_secs(3));
        assert_eq!(settings.session.max_transport_retries, 1);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let settings = ConsoleSettings::from_yaml_str(
            "api:\n  base_url: http://backend:9000/api/v1\nsession:\n  fallback_connect_ms: 1500\n",
        )
        .expect("settings parse");
        assert_eq!(settings.api.base_url, "http://backend:9000/api/v1");
        assert_eq!(settings.api.request_timeout_ms, 30_000);
        assert_eq!(settings.session.fallback_connect_ms, 1500);
        assert_eq!(settings.session.connection_poll_ms, 500);
    }

    #[test]
    fn zero_fallback_is_rejected() {
        let error = ConsoleSettings::from_yaml_str("session:\n  fallback_connect_ms: 0\n")
            .unwrap_err();
        assert!(matches!(error, SettingsError::Invalid(_)));
    }

    #[test]
    fn retry_cap_cannot_be_raised() {
        let error = ConsoleSettings::from_yaml_str("session:\n  max_transport_retries: 5\n")
            .unwrap_err();
        assert!(matches!(
            error,
            SettingsError::Invalid(ref message) if message.contains("max_transport_retries")
        ));

        let disabled = ConsoleSettings::from_yaml_str("session:\n  max_transport_retries: 0\n")
            .expect("settings parse");
        assert_eq!(disabled.session.transport_retries(), 0);

        let unchecked = SessionSettings {
            max_transport_retries: 5,
            ..SessionSettings::default()
        };
        assert_eq!(unchecked.transport_retries(), 1);
    }

    #[test]
    fn loads_vocabulary_override_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "session:\n  vocabulary:\n    started: [call_started]\n    ended: [call_ended]\n    failed: [error]\n"
        )
        .expect("write settings");

        let settings = ConsoleSettings::from_file(file.path()).expect("settings load");
        let vocabulary = settings.session.vocabulary();
        assert_eq!(vocabulary.started, vec!["call_started".to_string()]);
    }
}
