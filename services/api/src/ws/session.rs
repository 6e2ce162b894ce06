//! Manages the WebSocket connection lifecycle for one relay session.

use super::{
    downstream,
    manager::{ClientHandle, Registration},
    protocol::ServerMessage,
    transport::{BackendOutbox, ClientOutbox, OUTBOX_CAPACITY, Transport, TransportError, run_writer},
    upstream,
};
use crate::state::AppState;
use axum::{
    extract::{State, ws::WebSocketUpgrade},
    response::Response,
};
use buddy_core::{LocationState, SpeechSynthesizer, ToolExecutor};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, instrument};
use uuid::Uuid;

/// Everything the two relay loops of one session share.
pub struct SessionContext {
    pub id: Uuid,
    pub location: LocationState,
    pub client: ClientOutbox,
    pub backend: BackendOutbox,
    pub tools: Arc<ToolExecutor>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub language_code: String,
    pub alive: Arc<AtomicBool>,
    pub cancel: CancellationToken,
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| run_session(state, Transport::from_axum(socket)))
}

/// Runs one session from handshake to teardown.
///
/// The backend connection is opened before any client frame is read. Once
/// both sides are up, the two relays run until either finishes; the first
/// to finish cancels the session, which stops the other relay and makes both
/// writers flush and close their connection.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
pub async fn run_session(state: Arc<AppState>, client: Transport) {
    let cancel = state.shutdown.child_token();
    let Transport {
        sink: client_sink,
        stream: client_stream,
    } = client;

    let (client_tx, client_rx) = mpsc::channel(OUTBOX_CAPACITY);
    let client_writer = tokio::spawn(
        run_writer("client", client_sink, client_rx, cancel.clone()).in_current_span(),
    );
    let client_outbox = ClientOutbox::new(client_tx);
    let alive = Arc::new(AtomicBool::new(true));
    let location = LocationState::new(state.config.default_location);
    info!("New WebSocket connection. Opening AI service connection...");

    let handle = ClientHandle {
        outbox: client_outbox.clone(),
        alive: alive.clone(),
        cancel: cancel.clone(),
    };
    let Registration { id, backend } = match state
        .sessions
        .register(state.upstream.as_ref(), handle, &location)
        .await
    {
        Ok(registration) => registration,
        Err(e) => {
            error!(error = %e, "Session setup failed.");
            client_outbox.notify(ServerMessage::fail(e.to_string())).await;
            cancel.cancel();
            drop(client_outbox);
            let _ = client_writer.await;
            return;
        }
    };
    tracing::Span::current().record("session_id", tracing::field::display(id));
    info!("Session established.");

    let Transport {
        sink: backend_sink,
        stream: backend_stream,
    } = backend;
    let (backend_tx, backend_rx) = mpsc::channel(OUTBOX_CAPACITY);
    let backend_writer = tokio::spawn(
        run_writer("backend", backend_sink, backend_rx, cancel.clone()).in_current_span(),
    );

    let ctx = Arc::new(SessionContext {
        id,
        location,
        client: client_outbox,
        backend: BackendOutbox::new(backend_tx),
        tools: state.tools.clone(),
        speech: state.speech.clone(),
        language_code: state.config.tts_language.clone(),
        alive,
        cancel: cancel.clone(),
    });

    let downstream = tokio::spawn(
        supervise(
            "downstream",
            downstream::run(ctx.clone(), client_stream),
            cancel.clone(),
        )
        .in_current_span(),
    );
    let upstream = tokio::spawn(
        supervise(
            "upstream",
            upstream::run(ctx.clone(), backend_stream),
            cancel.clone(),
        )
        .in_current_span(),
    );
    let _ = tokio::join!(downstream, upstream);

    state.sessions.deregister(id).await;
    drop(ctx);
    let _ = tokio::join!(client_writer, backend_writer);
    info!("Session closed.");
}

/// Awaits one relay and cancels the session when it ends, however it ends.
async fn supervise(
    relay: &'static str,
    task: impl Future<Output = Result<(), TransportError>>,
    cancel: CancellationToken,
) {
    match task.await {
        Ok(()) => info!(relay, "Relay finished."),
        Err(e) => error!(relay, error = %e, "Relay terminated."),
    }
    cancel.cancel();
}
