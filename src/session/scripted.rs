use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{sleep_until, Instant},
};

use crate::error::SettingsError;

use super::client::{
    AudioGrant, ConnectionState, MicrophoneAccess, MicrophoneError, ProviderError, ProviderEvent,
    RealtimeClient,
};

/// What a scripted `join` attempt returns. Attempts past the end of the
/// script are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JoinOutcome {
    Accept,
    RejectToken {
        message: String,
    },
    Transport {
        message: String,
        #[serde(default)]
        transient: bool,
    },
    Fail {
        message: String,
    },
}

impl JoinOutcome {
    fn into_result(self) -> Result<(), ProviderError> {
        match self {
            JoinOutcome::Accept => Ok(()),
            JoinOutcome::RejectToken { message } => Err(ProviderError::TokenRejected(message)),
            JoinOutcome::Transport { message, transient } => {
                Err(ProviderError::Transport { message, transient })
            }
            JoinOutcome::Fail { message } => Err(ProviderError::Other(message)),
        }
    }
}

/// An event emitted `after_ms` after a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedEvent {
    #[serde(default)]
    pub after_ms: u64,
    pub name: String,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicrophoneMode {
    #[default]
    Granted,
    Denied,
    NotFound,
}

/// Replayable description of a provider session, used by the CLI's offline
/// `web-call join --script` mode and by tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionScript {
    #[serde(default)]
    pub join: Vec<JoinOutcome>,
    #[serde(default)]
    pub join_delay_ms: u64,
    #[serde(default)]
    pub events: Vec<ScriptedEvent>,
    /// Connection polling reports `active` this long after a successful join.
    #[serde(default)]
    pub active_after_ms: Option<u64>,
    #[serde(default)]
    pub microphone: MicrophoneMode,
}

impl SessionScript {
    pub fn from_yaml_str(input: &str) -> Result<Self, SettingsError> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn with_join(mut self, outcome: JoinOutcome) -> Self {
        self.join.push(outcome);
        self
    }

    pub fn with_join_delay(mut self, delay: Duration) -> Self {
        self.join_delay_ms = delay.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn with_event(mut self, after_ms: u64, name: impl Into<String>) -> Self {
        self.events.push(ScriptedEvent {
            after_ms,
            name: name.into(),
            detail: None,
        });
        self
    }

    pub fn active_after(mut self, after_ms: u64) -> Self {
        self.active_after_ms = Some(after_ms);
        self
    }

    pub fn with_microphone(mut self, mode: MicrophoneMode) -> Self {
        self.microphone = mode;
        self
    }
}

#[derive(Default)]
struct ScriptState {
    pending: VecDeque<JoinOutcome>,
    joined_at: Option<Instant>,
    emitter: Option<JoinHandle<()>>,
    stopped: bool,
    muted: bool,
    join_calls: usize,
    stop_calls: usize,
}

pub struct ScriptedRealtimeClient {
    script: SessionScript,
    events: broadcast::Sender<ProviderEvent>,
    state: Mutex<ScriptState>,
}

impl ScriptedRealtimeClient {
    pub fn new(script: SessionScript) -> Self {
        let (events, _) = broadcast::channel(32);
        let state = ScriptState {
            pending: script.join.iter().cloned().collect(),
            ..ScriptState::default()
        };
        Self {
            script,
            events,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pushes an event to current subscribers, as the provider would.
    pub fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    pub fn join_calls(&self) -> usize {
        self.state().join_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.state().stop_calls
    }

    pub fn is_muted(&self) -> bool {
        self.state().muted
    }

    fn spawn_emitter(&self, joined_at: Instant) -> JoinHandle<()> {
        let mut scheduled = self.script.events.clone();
        scheduled.sort_by_key(|event| event.after_ms);
        let sender = self.events.clone();

        tokio::spawn(async move {
            for event in scheduled {
                sleep_until(joined_at + Duration::from_millis(event.after_ms)).await;
                let mut provider_event = ProviderEvent::new(event.name);
                provider_event.detail = event.detail;
                let _ = sender.send(provider_event);
            }
        })
    }
}

#[async_trait]
impl RealtimeClient for ScriptedRealtimeClient {
    fn events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    async fn join(&self, _access_token: &str) -> Result<(), ProviderError> {
        let outcome = {
            let mut state = self.state();
            state.join_calls += 1;
            state.stopped = false;
            state.muted = false;
            state.pending.pop_front().unwrap_or(JoinOutcome::Accept)
        };

        if self.script.join_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.script.join_delay_ms)).await;
        }

        outcome.into_result()?;

        let joined_at = Instant::now();
        let emitter = self.spawn_emitter(joined_at);
        let mut state = self.state();
        if let Some(previous) = state.emitter.replace(emitter) {
            previous.abort();
        }
        state.joined_at = Some(joined_at);
        Ok(())
    }

    async fn stop(&self) {
        let mut state = self.state();
        state.stop_calls += 1;
        state.stopped = true;
        state.joined_at = None;
        if let Some(emitter) = state.emitter.take() {
            emitter.abort();
        }
    }

    async fn set_muted(&self, muted: bool) {
        self.state().muted = muted;
    }

    async fn connection_state(&self) -> ConnectionState {
        let state = self.state();
        match state.joined_at {
            Some(joined_at) => match self.script.active_after_ms {
                Some(after_ms) if Instant::now() >= joined_at + Duration::from_millis(after_ms) => {
                    ConnectionState::Active
                }
                _ => ConnectionState::Connecting,
            },
            None if state.stopped => ConnectionState::Closed,
            None => ConnectionState::Unknown,
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Microphone stand-in that counts grants still held.
#[derive(Debug, Clone)]
pub struct ScriptedMicrophone {
    mode: MicrophoneMode,
    outstanding: Arc<AtomicUsize>,
}

impl ScriptedMicrophone {
    pub fn new(mode: MicrophoneMode) -> Self {
        Self {
            mode,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn granted() -> Self {
        Self::new(MicrophoneMode::Granted)
    }

    pub fn outstanding_grants(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MicrophoneAccess for ScriptedMicrophone {
    async fn acquire(&self) -> Result<AudioGrant, MicrophoneError> {
        match self.mode {
            MicrophoneMode::Denied => Err(MicrophoneError::Denied),
            MicrophoneMode::NotFound => Err(MicrophoneError::NotFound),
            MicrophoneMode::Granted => {
                self.outstanding.fetch_add(1, Ordering::SeqCst);
                let outstanding = Arc::clone(&self.outstanding);
                Ok(AudioGrant::new(move || {
                    outstanding.fetch_sub(1, Ordering::SeqCst);
                }))
            }
        }
    }
}
