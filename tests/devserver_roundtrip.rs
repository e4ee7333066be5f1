use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use voicedesk::{
    devserver,
    session::scripted::{ScriptedMicrophone, ScriptedRealtimeClient, SessionScript},
    AgentRoster, ApiClient, CallStatus, CallStatusUpdate, CallTriggerForm, CallTriggerPanel,
    ConfigurationEditor, DevBackend, SessionManager, SessionSettings, SessionStatus,
    WebCallPanel,
};

async fn start_backend() -> ApiClient {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(devserver::serve(listener, Arc::new(DevBackend::seeded())));
    ApiClient::new(format!("http://{addr}/api/v1")).expect("client")
}

#[tokio::test]
async fn console_round_trip_against_the_dev_backend() {
    let api = start_backend().await;

    let health = api.health().await.expect("health");
    assert_eq!(health.status, "healthy");

    let mut editor = ConfigurationEditor::load(&api, None).await.expect("load");
    assert_eq!(editor.configuration().id, Some(1));
    editor.begin_edit();
    editor.set_greeting("Hi, dispatch calling.").expect("edit");
    let saved = editor.save(&api).await.expect("save");
    assert_eq!(saved.greeting, "Hi, dispatch calling.");
    assert!(saved.updated_at.is_some());

    let mut panel = CallTriggerPanel::new();
    let form = CallTriggerForm {
        agent_config_id: Some(1),
        driver_name: "John Smith".into(),
        phone_number: "+15551234567".into(),
        load_number: "LOAD-1".into(),
        ..CallTriggerForm::default()
    };
    let response = panel.submit(&api, &form).await.expect("trigger");
    assert_eq!(panel.history()[0].call_id, response.call_id);
    assert_eq!(panel.history().len(), 3);

    let mut update = CallStatusUpdate::new(CallStatus::Completed);
    update.duration_seconds = Some(95);
    api.update_call_status(&response.call_id, &update)
        .await
        .expect("status update");
    let call = api.get_call(&response.call_id).await.expect("call");
    assert_eq!(call.status, CallStatus::Completed);
    assert_eq!(call.duration_label(), "1:35");

    let completed = api
        .calls_by_status(CallStatus::Completed, 50)
        .await
        .expect("by status");
    assert_eq!(completed.len(), 2);
    let for_config = api.calls_by_agent(1, 50).await.expect("by agent");
    assert_eq!(for_config.len(), 3);
}

#[tokio::test]
async fn dev_backend_reports_errors_with_detail() {
    let api = start_backend().await;

    let missing = api.get_configuration(99).await.unwrap_err();
    assert_eq!(missing.status, 404);
    assert_eq!(missing.message, "Agent configuration not found");

    let bad_phone = voicedesk::CallTrigger {
        driver_name: "John Smith".into(),
        phone_number: "not a number".into(),
        load_number: "LOAD-1".into(),
        agent_config_id: 1,
        delivery_address: None,
        expected_delivery_time: None,
        special_instructions: None,
    };
    let invalid = api.trigger_call(&bad_phone).await.unwrap_err();
    assert_eq!(invalid.status, 422);
    assert_eq!(
        invalid.message,
        "phone_number: Please enter a valid phone number"
    );

    let unknown_agent = api.create_web_call("agent_missing").await.unwrap_err();
    assert!(unknown_agent.is_not_found());
}

#[tokio::test]
async fn roster_reads_the_wrapped_agent_list() {
    let api = start_backend().await;

    let roster = AgentRoster::load(&api).await;
    assert_eq!(roster.banner(), None);
    let published = roster.filtered("", Some("published"));
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].agent_id, "agent_logistics");
}

#[tokio::test]
async fn web_call_joins_with_the_issued_token() {
    let api = start_backend().await;

    let settings = SessionSettings {
        fallback_connect_ms: 200,
        ..SessionSettings::default()
    };
    let client = Arc::new(ScriptedRealtimeClient::new(
        SessionScript::accepting().with_event(20, "call_started"),
    ));
    let microphone = ScriptedMicrophone::granted();
    let session = SessionManager::new(client.clone(), Arc::new(microphone.clone()), settings);
    let mut panel = WebCallPanel::new(session);

    assert_eq!(panel.load_agents(&api).await, None);
    assert!(panel.select_agent("agent_logistics").is_some());

    let mut statuses = panel.start(&api).await.expect("start");
    let token_issued = panel
        .response()
        .and_then(|response| response.access_token())
        .is_some();
    assert!(token_issued);

    let connected = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(snapshot) = statuses.next().await {
            if snapshot.status == SessionStatus::Connected {
                return true;
            }
        }
        false
    })
    .await
    .expect("session settles");
    assert!(connected);
    assert_eq!(panel.snapshot().call_id.as_deref(), Some("web_call_0001"));
    assert!(panel.toggle_mute().await);
    assert!(client.is_muted());

    panel.end().await;
    assert_eq!(panel.outcome().expect("no failure"), SessionStatus::Ended);
    assert_eq!(client.stop_calls(), 1);
    assert_eq!(microphone.outstanding_grants(), 0);

    panel.reset().await;
    assert_eq!(panel.snapshot().status, SessionStatus::Idle);
    assert!(panel.response().is_none());
}
