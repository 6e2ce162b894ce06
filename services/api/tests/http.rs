mod common;

use buddy_api::{models::SessionSummary, router::create_router, state::AppState};
use buddy_core::ToolExecutor;
use common::{FakeSpeech, FakeUpstream, Peer, app_state, pipe};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

async fn serve(state: Arc<AppState>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    addr.to_string()
}

fn state_with_backend() -> (Arc<AppState>, Peer) {
    let (backend_transport, backend) = pipe();
    let state = app_state(
        Arc::new(FakeUpstream::ready(backend_transport)),
        ToolExecutor::new(None),
        FakeSpeech { fail: false },
        None,
    );
    (state, backend)
}

#[tokio::test]
async fn health_and_empty_session_list() {
    let (state, _backend) = state_with_backend();
    let addr = serve(state).await;
    let http = reqwest::Client::new();

    let health: Value = http
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({ "status": "ok", "active_sessions": 0 }));

    let sessions: Vec<SessionSummary> = http
        .get(format!("http://{addr}/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (state, _backend) = state_with_backend();
    let addr = serve(state).await;

    let id = uuid::Uuid::new_v4();
    let response = reqwest::get(format!("http://{addr}/sessions/{id}"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], format!("Session {id} not found"));
}

#[tokio::test]
async fn openapi_document_lists_the_routes() {
    let (state, _backend) = state_with_backend();
    let addr = serve(state).await;

    let doc: Value = reqwest::get(format!("http://{addr}/api-docs/openapi.json"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(doc["paths"]["/sessions"].is_object());
    assert!(doc["paths"]["/sessions/{id}"].is_object());
    assert!(doc["paths"]["/health"].is_object());
}

#[tokio::test]
async fn websocket_session_is_listed_while_open() {
    let (state, mut backend) = state_with_backend();
    let addr = serve(state.clone()).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    backend.send_json(json!({ "setupComplete": {} }));

    let greeting = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let greeting: Value = serde_json::from_str(greeting.to_text().unwrap()).unwrap();
    assert_eq!(greeting["status"], "connected");

    let sessions: Vec<SessionSummary> = reqwest::get(format!("http://{addr}/sessions"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].alive);

    let one: SessionSummary = reqwest::get(format!("http://{addr}/sessions/{}", sessions[0].id))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(one, sessions[0]);

    ws.send(Message::Text(json!({ "type": "text", "content": "halo" }).to_string().into()))
        .await
        .unwrap();
    let turn = backend.next_json().await;
    assert_eq!(turn["clientContent"]["turns"][0]["parts"][0]["text"], "halo");

    ws.close(None).await.unwrap();
    backend.expect_close().await;

    // Deregistration happens right after both relays stop.
    let mut remaining = usize::MAX;
    for _ in 0..50 {
        remaining = state.sessions.len().await;
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 0);
}
