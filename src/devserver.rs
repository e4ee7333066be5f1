//! In-memory stand-in for the console backend.
//!
//! Serves the same REST surface under `/api/v1` so the console can be used
//! without the real backend or voice provider. State lives for the lifetime
//! of the process.

use std::{io, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    api::DEFAULT_PAGE_SIZE,
    editor::validate_configuration,
    error::ValidationErrors,
    results::fixture_calls,
    trigger::is_valid_phone,
    types::{
        newest_first, Agent, AgentConfiguration, CallRecord, CallStatus, CallStatusUpdate,
        CallTrigger, TriggerResponse, VoiceCallTrigger, WebCallRequest, WebCallResponse,
    },
};

#[derive(Debug, Default)]
struct Store {
    configs: Vec<AgentConfiguration>,
    agents: Vec<Agent>,
    calls: Vec<CallRecord>,
    next_config_id: i64,
    next_call_id: i64,
    issued: u64,
}

impl Store {
    fn config(&self, id: i64) -> Option<&AgentConfiguration> {
        self.configs.iter().find(|config| config.id == Some(id))
    }

    fn insert_config(&mut self, mut config: AgentConfiguration) -> AgentConfiguration {
        self.next_config_id += 1;
        let now = Utc::now();
        config.id = Some(self.next_config_id);
        config.created_at = Some(now);
        config.updated_at = Some(now);
        config.renumber_steps();
        self.configs.push(config.clone());
        config
    }

    fn insert_call(&mut self, mut record: CallRecord) -> CallRecord {
        self.next_call_id += 1;
        record.id = Some(self.next_call_id);
        self.calls.push(record.clone());
        record
    }

    fn sorted_calls(&self) -> Vec<CallRecord> {
        let mut calls = self.calls.clone();
        calls.sort_by(|a, b| newest_first(a.created_at, b.created_at));
        calls
    }
}

/// Shared state of the development backend.
#[derive(Debug, Default)]
pub struct DevBackend {
    store: Mutex<Store>,
}

impl DevBackend {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The logistics template, the two sample calls and two provider agents.
    pub fn seeded() -> Self {
        let mut store = Store::default();
        let template = store.insert_config(AgentConfiguration::logistics_template());

        for result in fixture_calls() {
            let mut record = result.record;
            record.agent_config_id = template.id;
            store.insert_call(record);
        }

        let agents = json!([
            {
                "agent_id": "agent_logistics",
                "agent_name": "Logistics Assistant",
                "voice_id": "11labs-Adrian",
                "is_published": true,
                "last_modification_timestamp": 1_733_050_800_000i64
            },
            {
                "agent_id": "agent_dispatch",
                "agent_name": "Dispatch Check-in",
                "voice_id": "11labs-Myra",
                "is_published": false,
                "last_modification_timestamp": 1_732_960_000_000i64
            }
        ]);
        store.agents = serde_json::from_value(agents).unwrap_or_default();

        Self {
            store: Mutex::new(store),
        }
    }
}

#[derive(Debug)]
struct DevError {
    status: StatusCode,
    detail: Value,
}

impl DevError {
    fn not_found(what: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: Value::String(format!("{what} not found")),
        }
    }

    fn invalid(errors: &ValidationErrors) -> Self {
        let detail = errors
            .iter()
            .map(|(field, message)| {
                json!({ "loc": ["body", field], "msg": message, "type": "value_error" })
            })
            .collect();
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: Value::Array(detail),
        }
    }
}

impl IntoResponse for DevError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

type DevResult<T> = Result<T, DevError>;
type SharedBackend = Arc<DevBackend>;

pub fn router(backend: SharedBackend) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/health", get(health))
        .route(
            "/agent-configurations",
            get(list_configurations).post(create_configuration),
        )
        .route(
            "/agent-configurations/{id}",
            get(get_configuration)
                .put(update_configuration)
                .delete(delete_configuration),
        )
        .route("/agents", get(list_agents))
        .route("/agents/create", post(create_agent))
        .route("/agents/{agent_id}", get(get_agent))
        .route("/calls", get(list_calls))
        .route("/calls/trigger", post(trigger_call))
        .route("/calls/voice/trigger", post(trigger_voice_call))
        .route("/calls/web-call", post(create_web_call))
        .route("/calls/agent/{agent_config_id}", get(calls_by_agent))
        .route("/calls/status/{status}", get(calls_by_status))
        .route("/calls/{call_id}", get(get_call))
        .route("/calls/{call_id}/status", put(update_call_status))
        .with_state(backend);

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(listener: TcpListener, backend: SharedBackend) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "dev backend listening");
    }
    axum::serve(listener, router(backend)).await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "voicedesk-dev-backend" }))
}

async fn list_configurations(State(backend): State<SharedBackend>) -> Json<Vec<AgentConfiguration>> {
    Json(backend.store.lock().await.configs.clone())
}

async fn get_configuration(
    State(backend): State<SharedBackend>,
    Path(id): Path<i64>,
) -> DevResult<Json<AgentConfiguration>> {
    let store = backend.store.lock().await;
    store
        .config(id)
        .cloned()
        .map(Json)
        .ok_or_else(|| DevError::not_found("Agent configuration"))
}

async fn create_configuration(
    State(backend): State<SharedBackend>,
    Json(config): Json<AgentConfiguration>,
) -> DevResult<(StatusCode, Json<AgentConfiguration>)> {
    validate_configuration(&config).map_err(|errors| DevError::invalid(&errors))?;
    let stored = backend.store.lock().await.insert_config(config);
    info!(id = ?stored.id, name = %stored.agent_name, "configuration created");
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn update_configuration(
    State(backend): State<SharedBackend>,
    Path(id): Path<i64>,
    Json(mut config): Json<AgentConfiguration>,
) -> DevResult<Json<AgentConfiguration>> {
    validate_configuration(&config).map_err(|errors| DevError::invalid(&errors))?;

    let mut store = backend.store.lock().await;
    let existing = store
        .configs
        .iter_mut()
        .find(|existing| existing.id == Some(id))
        .ok_or_else(|| DevError::not_found("Agent configuration"))?;

    config.id = Some(id);
    config.created_at = existing.created_at;
    config.updated_at = Some(Utc::now());
    config.renumber_steps();
    *existing = config.clone();
    info!(id, "configuration updated");
    Ok(Json(config))
}

async fn delete_configuration(
    State(backend): State<SharedBackend>,
    Path(id): Path<i64>,
) -> DevResult<StatusCode> {
    let mut store = backend.store.lock().await;
    let before = store.configs.len();
    store.configs.retain(|config| config.id != Some(id));
    if store.configs.len() == before {
        return Err(DevError::not_found("Agent configuration"));
    }
    info!(id, "configuration deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_agents(State(backend): State<SharedBackend>) -> Json<Value> {
    let store = backend.store.lock().await;
    Json(json!({ "data": store.agents }))
}

async fn get_agent(
    State(backend): State<SharedBackend>,
    Path(agent_id): Path<String>,
) -> DevResult<Json<Agent>> {
    let store = backend.store.lock().await;
    store
        .agents
        .iter()
        .find(|agent| agent.agent_id == agent_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| DevError::not_found("Agent"))
}

async fn create_agent(
    State(backend): State<SharedBackend>,
    Json(config): Json<AgentConfiguration>,
) -> DevResult<(StatusCode, Json<Value>)> {
    validate_configuration(&config).map_err(|errors| DevError::invalid(&errors))?;

    let mut store = backend.store.lock().await;
    let agent = Agent {
        agent_id: format!("agent_{:04}", store.agents.len() + 1),
        agent_name: Some(config.agent_name.clone()),
        voice_id: Some("11labs-Adrian".into()),
        status: None,
        is_published: Some(false),
        last_modification_timestamp: Some(Utc::now()),
    };
    store.agents.push(agent.clone());
    info!(agent_id = %agent.agent_id, "agent created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Agent created successfully",
            "agent_id": agent.agent_id,
            "agent_name": agent.agent_name,
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct Page {
    limit: Option<u32>,
    offset: Option<u32>,
}

impl Page {
    fn apply(&self, calls: Vec<CallRecord>) -> Vec<CallRecord> {
        calls
            .into_iter()
            .skip(self.offset.unwrap_or(0) as usize)
            .take(self.limit.unwrap_or(DEFAULT_PAGE_SIZE) as usize)
            .collect()
    }
}

async fn list_calls(
    State(backend): State<SharedBackend>,
    Query(page): Query<Page>,
) -> Json<Vec<CallRecord>> {
    let calls = backend.store.lock().await.sorted_calls();
    Json(page.apply(calls))
}

async fn get_call(
    State(backend): State<SharedBackend>,
    Path(call_id): Path<String>,
) -> DevResult<Json<CallRecord>> {
    let store = backend.store.lock().await;
    store
        .calls
        .iter()
        .find(|call| call.call_id == call_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| DevError::not_found("Call"))
}

async fn calls_by_agent(
    State(backend): State<SharedBackend>,
    Path(agent_config_id): Path<i64>,
    Query(page): Query<Page>,
) -> Json<Vec<CallRecord>> {
    let calls = backend
        .store
        .lock()
        .await
        .sorted_calls()
        .into_iter()
        .filter(|call| call.agent_config_id == Some(agent_config_id))
        .collect();
    Json(page.apply(calls))
}

async fn calls_by_status(
    State(backend): State<SharedBackend>,
    Path(status): Path<String>,
    Query(page): Query<Page>,
) -> DevResult<Json<Vec<CallRecord>>> {
    let status: CallStatus = status.parse().map_err(|_| {
        let mut errors = ValidationErrors::new();
        errors.add("status", format!("unknown call status: {status}"));
        DevError::invalid(&errors)
    })?;
    let calls = backend
        .store
        .lock()
        .await
        .sorted_calls()
        .into_iter()
        .filter(|call| call.status == status)
        .collect();
    Ok(Json(page.apply(calls)))
}

fn check_call_fields(
    store: &Store,
    errors: &mut ValidationErrors,
    agent_config_id: i64,
    driver_name: &str,
    load_number: &str,
) -> DevResult<()> {
    if store.config(agent_config_id).is_none() {
        return Err(DevError::not_found("Agent configuration"));
    }
    if driver_name.trim().is_empty() {
        errors.add("driver_name", "Driver name is required");
    }
    if load_number.trim().is_empty() {
        errors.add("load_number", "Load number is required");
    }
    Ok(())
}

fn start_call(
    store: &mut Store,
    driver_name: String,
    phone_number: String,
    load_number: String,
    delivery_address: Option<String>,
    agent_config_id: i64,
) -> TriggerResponse {
    let call_id = format!("call_{:06}", store.next_call_id + 1);
    store.insert_call(CallRecord {
        id: None,
        call_id: call_id.clone(),
        driver_name,
        phone_number,
        load_number,
        delivery_address,
        status: CallStatus::InProgress,
        duration_seconds: None,
        agent_config_id: Some(agent_config_id),
        created_at: Some(Utc::now()),
    });
    info!(%call_id, agent_config_id, "call started");

    TriggerResponse {
        message: Some("Call initiated successfully".into()),
        retell_call_id: Some(format!("dev_{call_id}")),
        call_id,
        status: CallStatus::InProgress,
    }
}

async fn trigger_call(
    State(backend): State<SharedBackend>,
    Json(trigger): Json<CallTrigger>,
) -> DevResult<(StatusCode, Json<TriggerResponse>)> {
    let mut store = backend.store.lock().await;
    let mut errors = ValidationErrors::new();
    check_call_fields(
        &store,
        &mut errors,
        trigger.agent_config_id,
        &trigger.driver_name,
        &trigger.load_number,
    )?;
    if !is_valid_phone(trigger.phone_number.trim()) {
        errors.add("phone_number", "Please enter a valid phone number");
    }
    if !errors.is_empty() {
        return Err(DevError::invalid(&errors));
    }

    let response = start_call(
        &mut store,
        trigger.driver_name,
        trigger.phone_number,
        trigger.load_number,
        trigger.delivery_address,
        trigger.agent_config_id,
    );
    Ok((StatusCode::CREATED, Json(response)))
}

async fn trigger_voice_call(
    State(backend): State<SharedBackend>,
    Json(trigger): Json<VoiceCallTrigger>,
) -> DevResult<(StatusCode, Json<TriggerResponse>)> {
    let mut store = backend.store.lock().await;
    let mut errors = ValidationErrors::new();
    check_call_fields(
        &store,
        &mut errors,
        trigger.agent_config_id,
        &trigger.driver_name,
        &trigger.load_number,
    )?;
    if !errors.is_empty() {
        return Err(DevError::invalid(&errors));
    }

    let response = start_call(
        &mut store,
        trigger.driver_name,
        "web".into(),
        trigger.load_number,
        trigger.delivery_address,
        trigger.agent_config_id,
    );
    Ok((StatusCode::CREATED, Json(response)))
}

async fn update_call_status(
    State(backend): State<SharedBackend>,
    Path(call_id): Path<String>,
    Json(update): Json<CallStatusUpdate>,
) -> DevResult<Json<Value>> {
    let mut store = backend.store.lock().await;
    let call = store
        .calls
        .iter_mut()
        .find(|call| call.call_id == call_id)
        .ok_or_else(|| DevError::not_found("Call"))?;

    call.status = update.status;
    if update.duration_seconds.is_some() {
        call.duration_seconds = update.duration_seconds;
    }
    info!(%call_id, status = %update.status, "call status updated");

    Ok(Json(json!({
        "message": "Call status updated successfully",
        "call_id": call_id,
        "status": update.status,
    })))
}

async fn create_web_call(
    State(backend): State<SharedBackend>,
    Json(request): Json<WebCallRequest>,
) -> DevResult<Json<WebCallResponse>> {
    let mut store = backend.store.lock().await;
    if !store
        .agents
        .iter()
        .any(|agent| agent.agent_id == request.agent_id)
    {
        return Err(DevError::not_found("Agent"));
    }

    store.issued += 1;
    let call_id = format!("web_call_{:04}", store.issued);
    let token = format!("devtoken-{}-{}", store.issued, request.agent_id);
    info!(%call_id, agent_id = %request.agent_id, "web call registered");

    Ok(Json(WebCallResponse {
        agent_id: request.agent_id,
        call_id: Some(call_id),
        access_token: Some(token.clone()),
        web_call_url: Some(format!(
            "https://dev.voicedesk.local/call?access_token={token}"
        )),
        status: "registered".into(),
        message: Some("Web call created successfully".into()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_backend_has_sample_data() {
        let backend = DevBackend::seeded();
        let store = backend.store.lock().await;

        assert_eq!(store.configs.len(), 1);
        assert_eq!(store.configs[0].id, Some(1));
        assert_eq!(store.agents.len(), 2);
        assert_eq!(store.calls.len(), 2);
        assert!(store.calls.iter().all(|call| call.agent_config_id == Some(1)));
        assert_eq!(store.sorted_calls()[0].driver_name, "Sarah Johnson");
    }

    #[test]
    fn validation_errors_become_fastapi_style_detail() {
        let mut errors = ValidationErrors::new();
        errors.add("driver_name", "Driver name is required");
        let error = DevError::invalid(&errors);

        assert_eq!(error.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error.detail[0]["loc"][1], "driver_name");
        assert_eq!(error.detail[0]["msg"], "Driver name is required");
    }

    #[test]
    fn paging_skips_and_limits() {
        let calls: Vec<CallRecord> = fixture_calls().into_iter().map(|c| c.record).collect();
        let page = Page {
            limit: Some(1),
            offset: Some(1),
        };
        let paged = page.apply(calls);
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].driver_name, "Sarah Johnson");
    }
}
