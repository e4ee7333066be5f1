//! Web call session lifecycle.
//!
//! A [`SessionManager`] owns at most one in-flight call. Joining spawns a
//! driver task that validates the token, acquires the microphone, joins
//! through the [`RealtimeClient`] and then waits for the first of: a start
//! event, an `active` connection poll, or the fallback timer. Every timer,
//! subscription and audio grant lives inside that task, so a terminal status
//! always means nothing is left running.

pub mod client;
pub mod scripted;
pub mod vocabulary;

use std::{
    fmt,
    future::{pending, Future},
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_stream::stream;
use futures_core::Stream;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{broadcast::error::RecvError, oneshot, watch},
    task::JoinHandle,
    time::{interval, sleep, timeout, Instant, Interval, MissedTickBehavior, Sleep},
};
use tracing::{debug, error, info, warn};

use crate::{settings::SessionSettings, types::AccessToken};

use self::{
    client::{
        AudioGrant, ConnectionState, MicrophoneAccess, MicrophoneError, ProviderError,
        RealtimeClient,
    },
    vocabulary::{EventVocabulary, LifecycleSignal},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Connected,
    Ended,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Ended => "ended",
            SessionStatus::Error => "error",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Error)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFailure {
    #[error("access token invalid: {0}")]
    TokenInvalid(String),
    #[error("microphone access denied")]
    MicrophoneDenied,
    #[error("no microphone found")]
    MicrophoneNotFound,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("provider error: {0}")]
    Provider(String),
}

impl SessionFailure {
    /// Text suitable for showing to the operator.
    pub fn user_message(&self) -> String {
        match self {
            SessionFailure::TokenInvalid(_) => {
                "The access token is missing or expired. Create a new web call and try again."
                    .to_string()
            }
            SessionFailure::MicrophoneDenied => {
                "Microphone access was denied. Allow microphone access and try again.".to_string()
            }
            SessionFailure::MicrophoneNotFound => {
                "No microphone was found. Connect a microphone and try again.".to_string()
            }
            SessionFailure::Transport(message) => {
                format!("Could not reach the voice service: {message}")
            }
            SessionFailure::Provider(message) => format!("The call failed: {message}"),
        }
    }
}

impl From<MicrophoneError> for SessionFailure {
    fn from(error: MicrophoneError) -> Self {
        match error {
            MicrophoneError::Denied => SessionFailure::MicrophoneDenied,
            MicrophoneError::NotFound => SessionFailure::MicrophoneNotFound,
        }
    }
}

impl From<ProviderError> for SessionFailure {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::TokenRejected(message) => SessionFailure::TokenInvalid(message),
            ProviderError::Transport { message, .. } => SessionFailure::Transport(message),
            ProviderError::Other(message) => SessionFailure::Provider(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub failure: Option<SessionFailure>,
    pub call_id: Option<String>,
    /// Transport retries spent on the current join.
    pub retries: u32,
    pub connected_at: Option<Instant>,
    pub muted: bool,
    /// Local playback toggle; it has no effect on the provider.
    pub speaker_on: bool,
}

impl SessionSnapshot {
    fn idle() -> Self {
        Self {
            status: SessionStatus::Idle,
            failure: None,
            call_id: None,
            retries: 0,
            connected_at: None,
            muted: false,
            speaker_on: true,
        }
    }

    pub fn connected_for(&self) -> Option<Duration> {
        self.connected_at.map(|at| at.elapsed())
    }
}

/// Snapshots of one session, starting with the current one. Ends once the
/// session is no longer connecting or connected.
pub type StatusStream = Pin<Box<dyn Stream<Item = SessionSnapshot> + Send>>;

fn watch_statuses(mut receiver: watch::Receiver<SessionSnapshot>) -> StatusStream {
    Box::pin(stream! {
        let mut last = receiver.borrow_and_update().clone();
        yield last.clone();

        while last.status.is_active() {
            if receiver.changed().await.is_err() {
                break;
            }
            let next = receiver.borrow_and_update().clone();
            if next == last {
                continue;
            }
            last = next;
            yield last.clone();
        }
    })
}

/// Write access to the shared snapshot for one session generation. Once a
/// newer session starts, updates from older drivers are discarded.
#[derive(Clone)]
struct Publisher {
    state: Arc<watch::Sender<SessionSnapshot>>,
    generation: Arc<AtomicU64>,
    owned: u64,
}

impl Publisher {
    fn update(&self, apply: impl FnOnce(&mut SessionSnapshot) -> bool) -> bool {
        let generation = &self.generation;
        let owned = self.owned;
        self.state.send_if_modified(|snapshot| {
            generation.load(Ordering::SeqCst) == owned && apply(snapshot)
        })
    }

    fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }
}

struct ActiveSession {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

pub struct SessionManager {
    client: Arc<dyn RealtimeClient>,
    microphone: Arc<dyn MicrophoneAccess>,
    vocabulary: Arc<EventVocabulary>,
    settings: SessionSettings,
    state: Arc<watch::Sender<SessionSnapshot>>,
    generation: Arc<AtomicU64>,
    active: Option<ActiveSession>,
}

impl SessionManager {
    pub fn new(
        client: Arc<dyn RealtimeClient>,
        microphone: Arc<dyn MicrophoneAccess>,
        settings: SessionSettings,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::idle());
        Self {
            client,
            microphone,
            vocabulary: Arc::new(settings.vocabulary()),
            settings,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn statuses(&self) -> StatusStream {
        watch_statuses(self.state.subscribe())
    }

    /// Whether the driver task of the latest session is still running.
    pub fn has_pending_work(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    /// Starts joining the call `token` grants access to. Ignored while a
    /// session is already connecting or connected.
    pub fn join(&mut self, token: AccessToken) -> StatusStream {
        let current = self.status();
        if current.is_active() {
            warn!(status = %current, "join ignored while a session is in progress");
            return self.statuses();
        }

        // A terminal driver has already released everything it held.
        self.active = None;

        let generation = Arc::clone(&self.generation);
        let mut owned = 0;
        let call_id = token.call_id.clone();
        self.state.send_modify(|snapshot| {
            owned = generation.fetch_add(1, Ordering::SeqCst) + 1;
            *snapshot = SessionSnapshot {
                status: SessionStatus::Connecting,
                call_id,
                ..SessionSnapshot::idle()
            };
        });

        info!(
            client = self.client.name(),
            call_id = ?token.call_id,
            "joining web call"
        );

        let driver = Driver {
            client: Arc::clone(&self.client),
            microphone: Arc::clone(&self.microphone),
            vocabulary: Arc::clone(&self.vocabulary),
            settings: self.settings.clone(),
            publisher: Publisher {
                state: Arc::clone(&self.state),
                generation,
                owned,
            },
        };
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(driver.run(token, stopped));
        self.active = Some(ActiveSession {
            stop: Some(stop),
            task,
        });

        self.statuses()
    }

    /// Flips the microphone mute while a session is connecting or connected.
    /// Returns whether the microphone is now muted.
    pub async fn toggle_mute(&mut self) -> bool {
        let snapshot = self.snapshot();
        if !snapshot.status.is_active() {
            debug!(status = %snapshot.status, "mute ignored without an active session");
            return snapshot.muted;
        }
        let muted = !snapshot.muted;
        self.client.set_muted(muted).await;
        self.state.send_if_modified(|snapshot| {
            if !snapshot.status.is_active() {
                return false;
            }
            snapshot.muted = muted;
            true
        });
        self.state.borrow().muted
    }

    /// Flips local speaker playback. Returns whether the speaker is now on.
    pub fn toggle_speaker(&mut self) -> bool {
        self.state.send_modify(|snapshot| snapshot.speaker_on = !snapshot.speaker_on);
        self.state.borrow().speaker_on
    }

    /// Stops the current session and waits until its resources are released.
    pub async fn end(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        if let Some(stop) = active.stop.take() {
            let _ = stop.send(());
        }
        if let Err(join_error) = active.task.await {
            error!(error = %join_error, "session driver did not finish cleanly");
            self.client.stop().await;
            self.state.send_if_modified(|snapshot| {
                if snapshot.status.is_active() {
                    snapshot.status = SessionStatus::Ended;
                    true
                } else {
                    false
                }
            });
        }
    }

    pub async fn reset(&mut self) {
        self.end().await;
        let generation = Arc::clone(&self.generation);
        self.state.send_modify(|snapshot| {
            generation.fetch_add(1, Ordering::SeqCst);
            *snapshot = SessionSnapshot::idle();
        });
        debug!("session reset");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        if active.task.is_finished() {
            return;
        }
        active.task.abort();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = Arc::clone(&self.client);
            handle.spawn(async move { client.stop().await });
        }
    }
}

enum Outcome {
    Stopped,
    Ended,
    Failed(SessionFailure),
}

struct Driver {
    client: Arc<dyn RealtimeClient>,
    microphone: Arc<dyn MicrophoneAccess>,
    vocabulary: Arc<EventVocabulary>,
    settings: SessionSettings,
    publisher: Publisher,
}

async fn until_some<F: Future + Unpin>(slot: &mut Option<F>) -> F::Output {
    match slot.as_mut() {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn next_tick(slot: &mut Option<Interval>) {
    match slot.as_mut() {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

impl Driver {
    async fn run(self, token: AccessToken, mut stop: oneshot::Receiver<()>) {
        let mut events = self.client.events();
        let mut establishing = Some(Box::pin(self.establish(token)));
        let mut grant: Option<AudioGrant> = None;
        let mut fallback: Option<Pin<Box<Sleep>>> = None;
        let mut poll: Option<Interval> = None;

        let outcome = loop {
            tokio::select! {
                _ = &mut stop => break Outcome::Stopped,
                result = until_some(&mut establishing) => {
                    establishing = None;
                    match result {
                        Ok(audio) => {
                            grant = Some(audio);
                            if self.publisher.status() == SessionStatus::Connecting {
                                debug!("joined; waiting for a start signal");
                                fallback = Some(Box::pin(sleep(self.settings.fallback_connect())));
                                let mut ticker = interval(self.settings.connection_poll());
                                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                                poll = Some(ticker);
                            }
                        }
                        Err(failure) => break Outcome::Failed(failure),
                    }
                }
                received = events.recv() => match received {
                    Ok(event) => match self.vocabulary.classify(&event) {
                        Some(LifecycleSignal::Started) => {
                            fallback = None;
                            poll = None;
                            self.mark_connected("start event");
                        }
                        Some(LifecycleSignal::Ended) => break Outcome::Ended,
                        Some(LifecycleSignal::Failed) => {
                            let message = event.detail.unwrap_or(event.name);
                            break Outcome::Failed(SessionFailure::Provider(message));
                        }
                        None => debug!(event = %event.name, "ignoring provider event"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "provider events lagged");
                    }
                    Err(RecvError::Closed) => {
                        break if self.publisher.status() == SessionStatus::Connected {
                            Outcome::Ended
                        } else {
                            Outcome::Failed(SessionFailure::Transport(
                                "provider event stream closed".to_string(),
                            ))
                        };
                    }
                },
                _ = until_some(&mut fallback) => {
                    fallback = None;
                    poll = None;
                    self.mark_connected("fallback timer");
                }
                _ = next_tick(&mut poll) => match self.client.connection_state().await {
                    ConnectionState::Active => {
                        fallback = None;
                        poll = None;
                        self.mark_connected("connection poll");
                    }
                    ConnectionState::Closed => {
                        break Outcome::Failed(SessionFailure::Transport(
                            "connection closed before the call started".to_string(),
                        ));
                    }
                    ConnectionState::Unknown | ConnectionState::Connecting => {}
                },
            }
        };

        drop(establishing);
        self.client.stop().await;
        drop(grant);

        let (status, failure) = match outcome {
            Outcome::Stopped | Outcome::Ended => (SessionStatus::Ended, None),
            Outcome::Failed(failure) => (SessionStatus::Error, Some(failure)),
        };
        match &failure {
            Some(failure) => warn!(%failure, "web call failed"),
            None => info!("web call ended"),
        }
        self.publisher.update(|snapshot| {
            snapshot.status = status;
            snapshot.failure = failure;
            true
        });
    }

    async fn establish(&self, token: AccessToken) -> Result<AudioGrant, SessionFailure> {
        if token.is_blank() {
            return Err(SessionFailure::TokenInvalid(
                "no access token was issued".to_string(),
            ));
        }
        let ttl = self.settings.token_ttl();
        if token.is_expired(ttl) {
            return Err(SessionFailure::TokenInvalid(
                "access token expired before the call was joined".to_string(),
            ));
        }

        let grant = self.microphone.acquire().await?;

        let mut retries = 0;
        loop {
            match timeout(self.settings.join_timeout(), self.client.join(token.value())).await {
                Ok(Ok(())) => return Ok(grant),
                Ok(Err(ProviderError::Transport {
                    message,
                    transient: true,
                })) if retries < self.settings.transport_retries() && !token.is_expired(ttl) => {
                    retries += 1;
                    warn!(%message, retries, "transient transport failure; retrying join");
                    self.publisher.update(|snapshot| {
                        snapshot.retries = retries;
                        true
                    });
                    sleep(self.settings.retry_backoff()).await;
                }
                Ok(Err(provider_error)) => return Err(provider_error.into()),
                Err(_) => {
                    return Err(SessionFailure::Transport(format!(
                        "timed out after {}ms joining the call",
                        self.settings.join_timeout_ms
                    )))
                }
            }
        }
    }

    fn mark_connected(&self, trigger: &'static str) {
        let connected = self.publisher.update(|snapshot| {
            if snapshot.status != SessionStatus::Connecting {
                return false;
            }
            snapshot.status = SessionStatus::Connected;
            snapshot.connected_at = Some(Instant::now());
            true
        });
        if connected {
            info!(trigger, "web call connected");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::Utc;
    use futures_util::StreamExt;
    use tokio::sync::broadcast;

    use super::*;
    use crate::session::client::ProviderEvent;
    use crate::session::scripted::{
        JoinOutcome, MicrophoneMode, ScriptedMicrophone, ScriptedRealtimeClient, SessionScript,
    };

    fn manager_for(
        script: SessionScript,
    ) -> (SessionManager, Arc<ScriptedRealtimeClient>, ScriptedMicrophone) {
        let microphone = ScriptedMicrophone::new(script.microphone);
        let client = Arc::new(ScriptedRealtimeClient::new(script));
        let manager = SessionManager::new(
            client.clone(),
            Arc::new(microphone.clone()),
            SessionSettings::default(),
        );
        (manager, client, microphone)
    }

    fn token() -> AccessToken {
        AccessToken::new("token-abc").with_call_id("call_1")
    }

    async fn advance(ms: u64) {
        sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_timer_connects_after_three_seconds() {
        let (mut manager, _client, _microphone) = manager_for(SessionScript::accepting());

        manager.join(token());
        assert_eq!(manager.status(), SessionStatus::Connecting);

        advance(2_900).await;
        assert_eq!(manager.status(), SessionStatus::Connecting);

        advance(200).await;
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Connected);
        assert!(snapshot.connected_at.is_some());
        assert_eq!(snapshot.call_id.as_deref(), Some("call_1"));

        advance(10_000).await;
        assert_eq!(manager.status(), SessionStatus::Connected);
        assert_eq!(manager.snapshot().failure, None);
    }

    #[tokio::test(start_paused = true)]
    async fn start_event_connects_before_the_fallback() {
        let (mut manager, _client, _microphone) =
            manager_for(SessionScript::accepting().with_event(500, "conversationStarted"));

        manager.join(token());
        advance(600).await;

        assert_eq!(manager.status(), SessionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_poll_detects_an_active_call() {
        let (mut manager, _client, _microphone) =
            manager_for(SessionScript::accepting().active_after(1_200));

        manager.join(token());
        advance(1_000).await;
        assert_eq!(manager.status(), SessionStatus::Connecting);

        advance(600).await;
        assert_eq!(manager.status(), SessionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn end_event_releases_everything() {
        let (mut manager, client, microphone) = manager_for(
            SessionScript::accepting()
                .with_event(100, "call_started")
                .with_event(1_000, "call_ended"),
        );

        manager.join(token());
        advance(200).await;
        assert_eq!(microphone.outstanding_grants(), 1);

        advance(1_300).await;
        assert_eq!(manager.status(), SessionStatus::Ended);
        assert_eq!(client.stop_calls(), 1);
        assert_eq!(microphone.outstanding_grants(), 0);
        assert!(!manager.has_pending_work());
    }

    #[tokio::test(start_paused = true)]
    async fn error_event_is_terminal_and_cancels_the_fallback() {
        let (mut manager, client, microphone) =
            manager_for(SessionScript::accepting().with_event(100, "error"));

        manager.join(token());
        advance(5_000).await;

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Error);
        assert_eq!(
            snapshot.failure,
            Some(SessionFailure::Provider("error".to_string()))
        );
        assert_eq!(client.stop_calls(), 1);
        assert_eq!(microphone.outstanding_grants(), 0);
        assert!(!manager.has_pending_work());
    }

    #[tokio::test(start_paused = true)]
    async fn denied_microphone_fails_without_joining() {
        let (mut manager, client, _microphone) =
            manager_for(SessionScript::accepting().with_microphone(MicrophoneMode::Denied));

        manager.join(token());
        advance(10).await;

        assert_eq!(manager.status(), SessionStatus::Error);
        assert_eq!(
            manager.snapshot().failure,
            Some(SessionFailure::MicrophoneDenied)
        );
        assert_eq!(client.join_calls(), 0);

        advance(5_000).await;
        assert_eq!(manager.status(), SessionStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_microphone_is_reported() {
        let (mut manager, _client, _microphone) =
            manager_for(SessionScript::accepting().with_microphone(MicrophoneMode::NotFound));

        manager.join(token());
        advance(10).await;

        assert_eq!(
            manager.snapshot().failure,
            Some(SessionFailure::MicrophoneNotFound)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn blank_and_expired_tokens_are_rejected_before_joining() {
        let (mut manager, client, _microphone) = manager_for(SessionScript::accepting());

        manager.join(AccessToken::new("   "));
        advance(10).await;
        assert!(matches!(
            manager.snapshot().failure,
            Some(SessionFailure::TokenInvalid(_))
        ));

        let stale = AccessToken::new("token-abc")
            .issued_at(Utc::now() - chrono::Duration::seconds(120));
        manager.join(stale);
        advance(10).await;
        assert!(matches!(
            manager.snapshot().failure,
            Some(SessionFailure::TokenInvalid(_))
        ));
        assert_eq!(client.join_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_transport_failure_is_retried_once() {
        let (mut manager, client, _microphone) = manager_for(
            SessionScript::accepting()
                .with_join(JoinOutcome::Transport {
                    message: "ice negotiation failed".into(),
                    transient: true,
                })
                .with_join(JoinOutcome::Accept),
        );

        manager.join(token());
        advance(1_100).await;
        assert_eq!(client.join_calls(), 2);
        assert_eq!(manager.snapshot().retries, 1);
        assert_eq!(manager.status(), SessionStatus::Connecting);

        advance(3_000).await;
        assert_eq!(manager.status(), SessionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_retries_are_capped() {
        let failure = JoinOutcome::Transport {
            message: "ice negotiation failed".into(),
            transient: true,
        };
        let (mut manager, client, microphone) = manager_for(
            SessionScript::accepting()
                .with_join(failure.clone())
                .with_join(failure)
                .with_join(JoinOutcome::Accept),
        );

        manager.join(token());
        advance(5_000).await;

        assert_eq!(client.join_calls(), 2);
        assert_eq!(
            manager.snapshot().failure,
            Some(SessionFailure::Transport("ice negotiation failed".into()))
        );
        assert_eq!(microphone.outstanding_grants(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_cap_holds_when_settings_ask_for_more() {
        let failure = JoinOutcome::Transport {
            message: "ice negotiation failed".into(),
            transient: true,
        };
        let mut script = SessionScript::accepting();
        for _ in 0..6 {
            script = script.with_join(failure.clone());
        }
        let client = Arc::new(ScriptedRealtimeClient::new(script));
        let settings = SessionSettings {
            max_transport_retries: 5,
            ..SessionSettings::default()
        };
        let mut manager = SessionManager::new(
            client.clone(),
            Arc::new(ScriptedMicrophone::granted()),
            settings,
        );

        manager.join(token());
        advance(10_000).await;

        assert_eq!(client.join_calls(), 2);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.status, SessionStatus::Error);
    }

    struct ClosedTransport {
        events: broadcast::Sender<ProviderEvent>,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl RealtimeClient for ClosedTransport {
        fn events(&self) -> broadcast::Receiver<ProviderEvent> {
            self.events.subscribe()
        }

        async fn join(&self, _token: &str) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        async fn connection_state(&self) -> ConnectionState {
            ConnectionState::Closed
        }

        fn name(&self) -> &'static str {
            "closed"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn closed_connection_fails_instead_of_falling_back() {
        let (events, _) = broadcast::channel(4);
        let client = Arc::new(ClosedTransport {
            events,
            stops: AtomicUsize::new(0),
        });
        let microphone = ScriptedMicrophone::granted();
        let mut manager = SessionManager::new(
            client.clone(),
            Arc::new(microphone.clone()),
            SessionSettings::default(),
        );

        manager.join(token());
        advance(3_100).await;

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Error);
        assert_eq!(
            snapshot.failure,
            Some(SessionFailure::Transport(
                "connection closed before the call started".into()
            ))
        );
        assert_eq!(client.stops.load(Ordering::SeqCst), 1);
        assert_eq!(microphone.outstanding_grants(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mute_follows_the_active_session_and_reset_restores_defaults() {
        let (mut manager, client, _microphone) = manager_for(SessionScript::accepting());

        assert!(!manager.toggle_mute().await);
        assert!(!client.is_muted());

        manager.join(token());
        advance(3_100).await;
        assert!(manager.toggle_mute().await);
        assert!(client.is_muted());
        assert!(!manager.toggle_speaker());

        let snapshot = manager.snapshot();
        assert!(snapshot.muted);
        assert!(!snapshot.speaker_on);

        manager.reset().await;
        let snapshot = manager.snapshot();
        assert!(!snapshot.muted);
        assert!(snapshot.speaker_on);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_token_is_not_retried() {
        let (mut manager, client, _microphone) = manager_for(
            SessionScript::accepting().with_join(JoinOutcome::RejectToken {
                message: "expired".into(),
            }),
        );

        manager.join(token());
        advance(5_000).await;

        assert_eq!(client.join_calls(), 1);
        assert_eq!(
            manager.snapshot().failure,
            Some(SessionFailure::TokenInvalid("expired".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_join_times_out_as_transport_failure() {
        let (mut manager, client, _microphone) =
            manager_for(SessionScript::accepting().with_join_delay(Duration::from_secs(60)));

        manager.join(token());
        advance(9_900).await;
        assert_eq!(manager.status(), SessionStatus::Connecting);

        advance(200).await;
        assert_eq!(manager.status(), SessionStatus::Error);
        assert!(matches!(
            manager.snapshot().failure,
            Some(SessionFailure::Transport(_))
        ));
        assert_eq!(client.stop_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn end_while_connecting_is_deterministic() {
        let (mut manager, client, microphone) =
            manager_for(SessionScript::accepting().with_join_delay(Duration::from_secs(20)));

        manager.join(token());
        advance(100).await;
        manager.end().await;

        assert_eq!(manager.status(), SessionStatus::Ended);
        assert_eq!(client.stop_calls(), 1);
        assert_eq!(microphone.outstanding_grants(), 0);

        advance(30_000).await;
        assert_eq!(manager.status(), SessionStatus::Ended);
        assert_eq!(manager.snapshot().connected_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn second_join_is_ignored_while_connecting() {
        let (mut manager, client, microphone) = manager_for(SessionScript::accepting());

        manager.join(token());
        manager.join(AccessToken::new("other-token").with_call_id("call_2"));
        advance(100).await;

        assert_eq!(client.join_calls(), 1);
        assert_eq!(microphone.outstanding_grants(), 1);
        assert_eq!(manager.snapshot().call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_returns_to_idle_and_allows_a_new_join() {
        let (mut manager, client, _microphone) = manager_for(
            SessionScript::accepting().with_join(JoinOutcome::Fail {
                message: "agent unavailable".into(),
            }),
        );

        manager.join(token());
        advance(10).await;
        assert_eq!(manager.status(), SessionStatus::Error);

        manager.reset().await;
        assert_eq!(manager.snapshot(), SessionSnapshot::idle());

        manager.join(token());
        advance(3_100).await;
        assert_eq!(manager.status(), SessionStatus::Connected);
        assert_eq!(client.join_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn status_stream_follows_the_session_and_ends() {
        let (mut manager, _client, _microphone) = manager_for(
            SessionScript::accepting()
                .with_event(100, "call_started")
                .with_event(400, "call_ended"),
        );

        let statuses: Vec<SessionStatus> = manager
            .join(token())
            .map(|snapshot| snapshot.status)
            .collect()
            .await;

        assert_eq!(
            statuses,
            vec![
                SessionStatus::Connecting,
                SessionStatus::Connected,
                SessionStatus::Ended
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_manager_stops_the_client() {
        let (mut manager, client, microphone) = manager_for(SessionScript::accepting());

        manager.join(token());
        advance(100).await;
        drop(manager);
        advance(10).await;

        assert_eq!(client.stop_calls(), 1);
        assert_eq!(microphone.outstanding_grants(), 0);
    }

    #[test]
    fn failures_have_operator_messages() {
        assert!(SessionFailure::MicrophoneDenied
            .user_message()
            .contains("Microphone access was denied"));
        assert!(SessionFailure::Transport("timeout".into())
            .user_message()
            .ends_with("timeout"));
    }
}
