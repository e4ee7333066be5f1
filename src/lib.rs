pub mod error;
pub mod settings;
pub mod types;
pub mod api;
pub mod editor;
pub mod roster;
pub mod trigger;
pub mod session;
pub mod web_call;
pub mod results;
pub mod devserver;

pub use error::{ApiError, SettingsError, ValidationErrors};
pub use settings::{ApiSettings, ConsoleSettings, SessionSettings};
pub use types::{
    AccessToken, Agent, AgentConfiguration, CallRecord, CallResult, CallStatus,
    CallStatusUpdate, CallSummary, CallTrigger, ConversationStep, HealthStatus, TranscriptLine,
    TriggerResponse, VoiceCallTrigger, WebCallResponse,
};
pub use api::ApiClient;
pub use editor::{ConfigurationEditor, EditorError, StepMove};
pub use roster::AgentRoster;
pub use trigger::{CallTriggerForm, CallTriggerPanel, TriggerError, TriggerStatus, VoiceCallForm};
pub use session::{
    client::{
        AudioGrant, ConnectionState, MicrophoneAccess, MicrophoneError, ProviderError,
        ProviderEvent, RealtimeClient,
    },
    vocabulary::{EventVocabulary, LifecycleSignal},
    SessionFailure, SessionManager, SessionSnapshot, SessionStatus, StatusStream,
};
pub use web_call::{WebCallError, WebCallPanel};
pub use results::{ResultsError, ResultsViewer, StatusFilter};
pub use devserver::DevBackend;
pub use schemars::JsonSchema;
