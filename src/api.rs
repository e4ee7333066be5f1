use reqwest::{Client, Method, RequestBuilder, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::ApiError,
    settings::ApiSettings,
    types::{
        Agent, AgentConfiguration, CallRecord, CallStatus, CallStatusUpdate, CallTrigger,
        HealthStatus, Listing, TriggerResponse, VoiceCallTrigger, WebCallRequest,
        WebCallResponse,
    },
};

pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Typed client for the console backend. One method per endpoint; every
/// failure comes back as an [`ApiError`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    settings: ApiSettings,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::from_settings(ApiSettings::new(base_url))
    }

    pub fn from_settings(settings: ApiSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|error| ApiError::new(0, format!("failed to build http client: {error}"), None))?;

        Ok(Self { client, settings })
    }

    pub fn base_url(&self) -> &str {
        &self.settings.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Builds a URL from path segments, percent-encoding each one so ids
    /// containing `/`, `?` or `#` stay inside their segment.
    fn segments_url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let invalid = || {
            ApiError::new(
                0,
                format!("invalid base url: {}", self.settings.base_url),
                None,
            )
        };
        let mut url = Url::parse(&self.settings.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request_segments(
        &self,
        method: Method,
        segments: &[&str],
    ) -> Result<RequestBuilder, ApiError> {
        let url = self.segments_url(segments)?;
        debug!(%method, %url, "backend request");
        Ok(self.client.request(method, url))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.endpoint(path);
        debug!(%method, %url, "backend request");
        self.client.request(method, url)
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<(u16, String), ApiError> {
        let response = builder.send().await.map_err(|error| {
            warn!(%error, "backend unreachable");
            ApiError::network(error)
        })?;
        let status = response.status();
        let text = response.text().await.map_err(ApiError::network)?;

        if !status.is_success() {
            let error = ApiError::from_response(status.as_u16(), &text);
            warn!(status = error.status, message = %error.message, "backend returned an error");
            return Err(error);
        }

        Ok((status.as_u16(), text))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let (status, text) = self.execute(builder).await?;
        serde_json::from_str(&text).map_err(|error| {
            ApiError::new(
                status,
                format!("invalid response body: {error}"),
                Some(Value::String(text)),
            )
        })
    }

    async fn send_list<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<Vec<T>, ApiError> {
        let listing: Listing<T> = self.send(builder).await?;
        Ok(listing.into_vec())
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(self.request(method, path).json(body)).await
    }

    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.send(self.request(Method::GET, "health")).await
    }

    pub async fn list_configurations(&self) -> Result<Vec<AgentConfiguration>, ApiError> {
        self.send_list(self.request(Method::GET, "agent-configurations"))
            .await
    }

    pub async fn get_configuration(&self, id: i64) -> Result<AgentConfiguration, ApiError> {
        self.send(self.request(Method::GET, &format!("agent-configurations/{id}")))
            .await
    }

    pub async fn create_configuration(
        &self,
        config: &AgentConfiguration,
    ) -> Result<AgentConfiguration, ApiError> {
        self.send_json(Method::POST, "agent-configurations", config)
            .await
    }

    pub async fn update_configuration(
        &self,
        id: i64,
        config: &AgentConfiguration,
    ) -> Result<AgentConfiguration, ApiError> {
        self.send_json(Method::PUT, &format!("agent-configurations/{id}"), config)
            .await
    }

    pub async fn delete_configuration(&self, id: i64) -> Result<(), ApiError> {
        self.execute(self.request(Method::DELETE, &format!("agent-configurations/{id}")))
            .await
            .map(|_| ())
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>, ApiError> {
        self.send_list(self.request(Method::GET, "agents")).await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Agent, ApiError> {
        self.send(self.request_segments(Method::GET, &["agents", agent_id])?)
            .await
    }

    /// Registers a configuration as a new provider agent. The backend's reply
    /// is provider-shaped, so it is returned untyped.
    pub async fn create_agent(&self, config: &AgentConfiguration) -> Result<Value, ApiError> {
        self.send_json(Method::POST, "agents/create", config).await
    }

    pub async fn trigger_call(&self, trigger: &CallTrigger) -> Result<TriggerResponse, ApiError> {
        self.send_json(Method::POST, "calls/trigger", trigger).await
    }

    pub async fn trigger_voice_call(
        &self,
        trigger: &VoiceCallTrigger,
    ) -> Result<TriggerResponse, ApiError> {
        self.send_json(Method::POST, "calls/voice/trigger", trigger)
            .await
    }

    pub async fn list_calls(&self, limit: u32, offset: u32) -> Result<Vec<CallRecord>, ApiError> {
        let builder = self
            .request(Method::GET, "calls")
            .query(&[("limit", limit), ("offset", offset)]);
        self.send_list(builder).await
    }

    pub async fn get_call(&self, call_id: &str) -> Result<CallRecord, ApiError> {
        self.send(self.request_segments(Method::GET, &["calls", call_id])?)
            .await
    }

    pub async fn update_call_status(
        &self,
        call_id: &str,
        update: &CallStatusUpdate,
    ) -> Result<Value, ApiError> {
        let builder = self.request_segments(Method::PUT, &["calls", call_id, "status"])?;
        self.send(builder.json(update)).await
    }

    pub async fn calls_by_agent(
        &self,
        agent_config_id: i64,
        limit: u32,
    ) -> Result<Vec<CallRecord>, ApiError> {
        let builder = self
            .request(Method::GET, &format!("calls/agent/{agent_config_id}"))
            .query(&[("limit", limit)]);
        self.send_list(builder).await
    }

    pub async fn calls_by_status(
        &self,
        status: CallStatus,
        limit: u32,
    ) -> Result<Vec<CallRecord>, ApiError> {
        let builder = self
            .request(Method::GET, &format!("calls/status/{}", status.as_str()))
            .query(&[("limit", limit)]);
        self.send_list(builder).await
    }

    pub async fn create_web_call(&self, agent_id: &str) -> Result<WebCallResponse, ApiError> {
        let request = WebCallRequest {
            agent_id: agent_id.to_string(),
        };
        self.send_json(Method::POST, "calls/web-call", &request)
            .await
    }
}
