use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// A raw lifecycle event as named by the provider SDK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProviderEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Unknown,
    Connecting,
    Active,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("access token rejected: {0}")]
    TokenRejected(String),
    #[error("transport failure: {message}")]
    Transport { message: String, transient: bool },
    #[error("provider error: {0}")]
    Other(String),
}

/// The provider's real-time voice client, reduced to what the session
/// manager needs. Audio transport stays entirely inside the implementation.
#[async_trait]
pub trait RealtimeClient: Send + Sync {
    /// Subscribes to lifecycle events. Subscribe before `join` so early
    /// events are not missed.
    fn events(&self) -> broadcast::Receiver<ProviderEvent>;

    async fn join(&self, access_token: &str) -> Result<(), ProviderError>;

    /// Leaves the call and releases the audio transport. Must be idempotent.
    async fn stop(&self);

    async fn connection_state(&self) -> ConnectionState {
        ConnectionState::Unknown
    }

    /// Enables or disables the outgoing microphone track.
    async fn set_muted(&self, _muted: bool) {}

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MicrophoneError {
    #[error("microphone access denied")]
    Denied,
    #[error("no microphone found")]
    NotFound,
}

/// Held for as long as the session uses the microphone; dropping it
/// releases the device.
pub struct AudioGrant {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl AudioGrant {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn untracked() -> Self {
        Self { release: None }
    }
}

impl Drop for AudioGrant {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for AudioGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioGrant")
            .field("tracked", &self.release.is_some())
            .finish()
    }
}

#[async_trait]
pub trait MicrophoneAccess: Send + Sync {
    async fn acquire(&self) -> Result<AudioGrant, MicrophoneError>;
}
