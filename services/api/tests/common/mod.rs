//! Shared fixtures for the relay integration tests.
//!
//! Both the client socket and the backend socket are replaced by in-memory
//! channels, so a test plays both peers of a session.

#![allow(dead_code)]

use async_trait::async_trait;
use buddy_api::{
    config::Config,
    state::AppState,
    ws::{
        connector::{HandshakeError, Upstream},
        manager::SessionManager,
        transport::{Frame, Transport, TransportError},
    },
};
use buddy_core::{
    Coordinates, LocationState, SpeechSynthesizer, ToolExecutor,
    tools::{Tool, ToolError},
};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use vertex_live::{FunctionDeclaration, Schema};

pub const FAKE_AUDIO: &str = "bW9jaw==";
const WAIT: Duration = Duration::from_secs(5);

/// The far end of an in-memory connection.
pub struct Peer {
    pub tx: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    pub rx: mpsc::UnboundedReceiver<Frame>,
}

/// A connected pair: the relay side as a [`Transport`] and the test side as a [`Peer`].
pub fn pipe() -> (Transport, Peer) {
    let (to_relay, relay_in) = mpsc::unbounded();
    let (relay_out, from_relay) = mpsc::unbounded::<Frame>();
    let sink = relay_out.sink_map_err(|e| TransportError::Write(e.to_string()));
    (
        Transport::new(Box::pin(sink), Box::pin(relay_in)),
        Peer {
            tx: to_relay,
            rx: from_relay,
        },
    )
}

impl Peer {
    pub fn send_json(&self, value: Value) {
        self.send(Frame::Text(value.to_string()));
    }

    pub fn send(&self, frame: Frame) {
        self.tx
            .unbounded_send(Ok(frame))
            .expect("relay stopped reading");
    }

    pub fn fail_read(&self, reason: &str) {
        self.tx
            .unbounded_send(Err(TransportError::Read(reason.to_string())))
            .expect("relay stopped reading");
    }

    pub async fn next_frame(&mut self) -> Option<Frame> {
        tokio::time::timeout(WAIT, self.rx.next())
            .await
            .expect("timed out waiting for a frame")
    }

    /// The next text frame as JSON, skipping liveness pings.
    pub async fn next_json(&mut self) -> Value {
        loop {
            match self.next_frame().await {
                Some(Frame::Text(text)) => {
                    return serde_json::from_str(&text).expect("frame is not JSON");
                }
                Some(Frame::Ping(_)) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    /// Asserts that nothing arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(frame) = tokio::time::timeout(window, self.rx.next()).await {
            panic!("expected no frame, got {frame:?}");
        }
    }

    /// Waits for the relay to close this connection.
    pub async fn expect_close(&mut self) {
        loop {
            match self.next_frame().await {
                Some(Frame::Close) | None => return,
                Some(Frame::Ping(_)) => continue,
                Some(other) => panic!("expected the connection to close, got {other:?}"),
            }
        }
    }
}

/// Hands out one prepared backend connection, or fails the handshake.
pub struct FakeUpstream {
    backend: Mutex<Option<Transport>>,
    pub seen_location: Mutex<Option<Option<Coordinates>>>,
}

impl FakeUpstream {
    pub fn ready(backend: Transport) -> Self {
        Self {
            backend: Mutex::new(Some(backend)),
            seen_location: Mutex::new(None),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            backend: Mutex::new(None),
            seen_location: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn open(&self, location: &LocationState) -> Result<Transport, HandshakeError> {
        let current = location.get().await;
        *self.seen_location.lock().unwrap() = Some(current);
        self.backend
            .lock()
            .unwrap()
            .take()
            .ok_or(HandshakeError::Setup(TransportError::Closed))
    }
}

pub struct FakeSpeech {
    pub fail: bool,
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, _text: &str, _language_code: &str) -> anyhow::Result<String> {
        if self.fail {
            anyhow::bail!("speech service down");
        }
        Ok(FAKE_AUDIO.to_string())
    }
}

/// A tool that always answers with the same payload and remembers the
/// location it was called with.
pub struct FixedTool {
    name: &'static str,
    payload: Value,
    pub locations: Arc<Mutex<Vec<Option<Coordinates>>>>,
}

impl FixedTool {
    pub fn new(name: &'static str, payload: Value) -> Self {
        Self {
            name,
            payload,
            locations: Arc::default(),
        }
    }
}

#[async_trait]
impl Tool for FixedTool {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: self.name.to_string(),
            description: format!("Fixed answer for {}", self.name),
            parameters: Schema::object(),
        }
    }

    async fn call(
        &self,
        _args: &Map<String, Value>,
        location: Option<Coordinates>,
    ) -> Result<Value, ToolError> {
        self.locations.lock().unwrap().push(location);
        Ok(self.payload.clone())
    }
}

pub fn test_config(default_location: Option<Coordinates>) -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        log_level: Level::DEBUG,
        prompts_path: PathBuf::from("./prompts"),
        credentials_path: PathBuf::from("./credentials/key.json"),
        project_id: "test-project".to_string(),
        region: "us-central1".to_string(),
        model: "gemini-2.0-flash-exp".to_string(),
        live_endpoint: "ws://127.0.0.1:9/live".to_string(),
        tts_language: "id-ID".to_string(),
        openweathermap_api_key: None,
        currency_api_key: None,
        google_place_api_key: None,
        tool_timeout: None,
        sweep_interval: Duration::from_secs(30),
        default_location,
    }
}

pub fn app_state(
    upstream: Arc<dyn Upstream>,
    tools: ToolExecutor,
    speech: FakeSpeech,
    default_location: Option<Coordinates>,
) -> Arc<AppState> {
    Arc::new(AppState {
        config: Arc::new(test_config(default_location)),
        sessions: SessionManager::new(),
        upstream,
        tools: Arc::new(tools),
        speech: Arc::new(speech),
        shutdown: CancellationToken::new(),
    })
}

/// One running session with both of its peers.
pub struct Harness {
    pub state: Arc<AppState>,
    pub upstream: Arc<FakeUpstream>,
    pub client: Peer,
    pub backend: Peer,
    pub session: tokio::task::JoinHandle<()>,
}

impl Harness {
    pub fn start(tools: ToolExecutor, default_location: Option<Coordinates>) -> Self {
        Self::start_with_speech(tools, default_location, FakeSpeech { fail: false })
    }

    pub fn start_with_speech(
        tools: ToolExecutor,
        default_location: Option<Coordinates>,
        speech: FakeSpeech,
    ) -> Self {
        let (client_transport, client) = pipe();
        let (backend_transport, backend) = pipe();
        let upstream = Arc::new(FakeUpstream::ready(backend_transport));
        let state = app_state(upstream.clone(), tools, speech, default_location);
        let session = tokio::spawn(buddy_api::ws::run_session(state.clone(), client_transport));
        Self {
            state,
            upstream,
            client,
            backend,
            session,
        }
    }

    /// Acknowledges setup from the backend and waits for the client to see it.
    pub async fn connect(&mut self) {
        self.backend.send_json(serde_json::json!({ "setupComplete": {} }));
        let ready = self.client.next_json().await;
        assert_eq!(ready["status"], "connected");
    }

    /// Waits for the session task to finish.
    pub async fn finished(self) -> Arc<AppState> {
        tokio::time::timeout(WAIT, self.session)
            .await
            .expect("session did not finish")
            .expect("session task panicked");
        self.state
    }
}
