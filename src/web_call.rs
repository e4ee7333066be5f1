use thiserror::Error;
use tracing::info;

use crate::{
    api::ApiClient,
    error::{ApiError, ValidationErrors},
    roster::AgentRoster,
    session::{SessionFailure, SessionManager, SessionSnapshot, SessionStatus, StatusStream},
    types::{Agent, WebCallResponse},
};

#[derive(Debug, Error)]
pub enum WebCallError {
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("{}", .0.user_message())]
    Session(SessionFailure),
}

/// Picks a provider agent, asks the backend for a web call and joins it
/// through the session manager.
pub struct WebCallPanel {
    roster: AgentRoster,
    selected: Option<String>,
    response: Option<WebCallResponse>,
    session: SessionManager,
}

impl WebCallPanel {
    pub fn new(session: SessionManager) -> Self {
        Self {
            roster: AgentRoster::default(),
            selected: None,
            response: None,
            session,
        }
    }

    /// Refreshes the agent list. Returns the banner when loading failed.
    pub async fn load_agents(&mut self, api: &ApiClient) -> Option<&str> {
        self.roster = AgentRoster::load(api).await;
        self.roster.banner()
    }

    pub fn agents(&self) -> &[Agent] {
        self.roster.agents()
    }

    /// Selects an agent by id. Returns its details when it is in the loaded
    /// roster.
    pub fn select_agent(&mut self, agent_id: impl Into<String>) -> Option<&Agent> {
        let agent_id = agent_id.into();
        let trimmed = agent_id.trim();
        self.selected = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self.roster.find(self.selected.as_deref()?)
    }

    pub fn selected_agent_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn response(&self) -> Option<&WebCallResponse> {
        self.response.as_ref()
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub async fn create_web_call(
        &mut self,
        api: &ApiClient,
    ) -> Result<&WebCallResponse, WebCallError> {
        let Some(agent_id) = self.selected.clone() else {
            let mut errors = ValidationErrors::new();
            errors.add("agent_id", "Please select an agent");
            return Err(errors.into());
        };

        let response = api.create_web_call(&agent_id).await?;
        info!(
            %agent_id,
            call_id = ?response.call_id,
            has_token = response.access_token().is_some(),
            "web call created"
        );
        Ok(self.response.insert(response))
    }

    /// Creates a web call and joins it with the issued access token. A
    /// missing token surfaces as a session failure, not an API error.
    pub async fn start(&mut self, api: &ApiClient) -> Result<StatusStream, WebCallError> {
        if self.session.status().is_active() {
            return Ok(self.session.statuses());
        }
        let token = self.create_web_call(api).await?.to_access_token();
        Ok(self.session.join(token))
    }

    pub async fn end(&mut self) {
        self.session.end().await;
    }

    pub async fn toggle_mute(&mut self) -> bool {
        self.session.toggle_mute().await
    }

    pub fn toggle_speaker(&mut self) -> bool {
        self.session.toggle_speaker()
    }

    pub async fn reset(&mut self) {
        self.session.reset().await;
        self.response = None;
    }

    /// The session's failure, if any, otherwise its status.
    pub fn outcome(&self) -> Result<SessionStatus, WebCallError> {
        let snapshot = self.session.snapshot();
        match snapshot.failure {
            Some(failure) => Err(WebCallError::Session(failure)),
            None => Ok(snapshot.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        session::scripted::{ScriptedMicrophone, ScriptedRealtimeClient, SessionScript},
        settings::SessionSettings,
    };

    fn panel() -> WebCallPanel {
        let session = SessionManager::new(
            Arc::new(ScriptedRealtimeClient::new(SessionScript::accepting())),
            Arc::new(ScriptedMicrophone::granted()),
            SessionSettings::default(),
        );
        WebCallPanel::new(session)
    }

    #[tokio::test]
    async fn creating_without_an_agent_is_rejected_locally() {
        let mut panel = panel();
        // Nothing listens here; reaching the network would fail differently.
        let api = ApiClient::new("http://127.0.0.1:9/api/v1").expect("client");

        let error = panel.create_web_call(&api).await.unwrap_err();
        match error {
            WebCallError::Invalid(errors) => assert!(errors.contains("agent_id")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(panel.response().is_none());
    }

    #[test]
    fn blank_selection_clears_the_agent() {
        let mut panel = panel();
        panel.select_agent("agent_1");
        assert_eq!(panel.selected_agent_id(), Some("agent_1"));
        panel.select_agent("  ");
        assert_eq!(panel.selected_agent_id(), None);
        assert_eq!(panel.outcome().expect("no failure"), SessionStatus::Idle);
    }
}
