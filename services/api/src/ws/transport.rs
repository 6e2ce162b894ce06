//! Frame-level plumbing shared by both sides of a session.
//!
//! The client socket (axum) and the backend socket (tungstenite) are reduced
//! to the same [`Transport`] shape so the relay loops don't care which is which.
//! Each sink is owned by exactly one writer task fed through an mpsc queue.

use super::protocol::ServerMessage;
use axum::extract::ws::{Message as AxumMessage, WebSocket};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vertex_live::{ClientMessage as BackendMessage, LiveStream};

/// Queue depth for each writer task.
pub const OUTBOX_CAPACITY: usize = 64;

/// How long a cancelled writer may spend flushing and closing.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("connection closed")]
    Closed,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// Both halves of one connection.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }

    pub fn from_axum(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(|e| TransportError::Write(e.to_string()))
            .with(|frame: Frame| {
                future::ready(Ok::<_, TransportError>(match frame {
                    Frame::Text(text) => AxumMessage::Text(text.into()),
                    Frame::Binary(data) => AxumMessage::Binary(data),
                    Frame::Ping(data) => AxumMessage::Ping(data),
                    Frame::Pong(data) => AxumMessage::Pong(data),
                    Frame::Close => AxumMessage::Close(None),
                }))
            });
        let stream = stream.map(|msg| match msg {
            Ok(AxumMessage::Text(text)) => Ok(Frame::Text(text.as_str().to_owned())),
            Ok(AxumMessage::Binary(data)) => Ok(Frame::Binary(data)),
            Ok(AxumMessage::Ping(data)) => Ok(Frame::Ping(data)),
            Ok(AxumMessage::Pong(data)) => Ok(Frame::Pong(data)),
            Ok(AxumMessage::Close(_)) => Ok(Frame::Close),
            Err(e) => Err(TransportError::Read(e.to_string())),
        });
        Self::new(Box::pin(sink), Box::pin(stream))
    }

    pub fn from_tungstenite(socket: LiveStream) -> Self {
        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(|e| TransportError::Write(e.to_string()))
            .with(|frame: Frame| {
                future::ready(Ok::<_, TransportError>(match frame {
                    Frame::Text(text) => WsMessage::Text(text.into()),
                    Frame::Binary(data) => WsMessage::Binary(data),
                    Frame::Ping(data) => WsMessage::Ping(data),
                    Frame::Pong(data) => WsMessage::Pong(data),
                    Frame::Close => WsMessage::Close(None),
                }))
            });
        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(WsMessage::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(WsMessage::Binary(data)) => Some(Ok(Frame::Binary(data))),
                Ok(WsMessage::Ping(data)) => Some(Ok(Frame::Ping(data))),
                Ok(WsMessage::Pong(data)) => Some(Ok(Frame::Pong(data))),
                Ok(WsMessage::Close(_)) => Some(Ok(Frame::Close)),
                // Raw frames are never surfaced when reading.
                Ok(WsMessage::Frame(_)) => None,
                Err(e) => Some(Err(TransportError::Read(e.to_string()))),
            })
        });
        Self::new(Box::pin(sink), Box::pin(stream))
    }
}

/// Drains `rx` into `sink` until the queue closes or the session is cancelled.
///
/// Every sink operation races the session token, so a peer that stopped
/// reading cannot hold the writer. After cancellation, frames already queued
/// are still offered, so a terminal failure notice reaches a healthy peer
/// before the close frame; that flush is bounded by [`CLOSE_GRACE`], after
/// which the sink is dropped. A write failure cancels the session.
pub async fn run_writer(
    label: &'static str,
    mut sink: FrameSink,
    mut rx: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
) {
    let mut healthy = true;
    loop {
        let frame = tokio::select! {
            biased;
            frame = rx.recv() => frame,
            _ = cancel.cancelled() => break,
        };
        let Some(frame) = frame else { break };

        tokio::select! {
            sent = sink.send(frame) => {
                if let Err(e) = sent {
                    warn!(connection = label, error = %e, "Write failed, cancelling session.");
                    cancel.cancel();
                    healthy = false;
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    if healthy {
        let shutdown = async {
            while let Ok(frame) = rx.try_recv() {
                if sink.send(frame).await.is_err() {
                    return;
                }
            }
            let _ = sink.send(Frame::Close).await;
            if let Err(e) = sink.close().await {
                debug!(connection = label, error = %e, "Error while closing connection.");
            }
        };
        if tokio::time::timeout(CLOSE_GRACE, shutdown).await.is_err() {
            warn!(connection = label, "Peer is not accepting frames, dropping connection.");
        }
    }
    info!(connection = label, "Writer finished.");
}

/// Result of a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Sent,
    /// The writer is backed up; it is still alive, just slow.
    Busy,
    /// The writer has exited.
    Gone,
}

/// Handle for queueing frames to the client.
#[derive(Clone, Debug)]
pub struct ClientOutbox {
    tx: mpsc::Sender<Frame>,
}

impl ClientOutbox {
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, msg: ServerMessage) -> Result<(), TransportError> {
        let text = serde_json::to_string(&msg)?;
        self.tx
            .send(Frame::Text(text))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Best-effort send, used for failure notices on the way out.
    pub async fn notify(&self, msg: ServerMessage) {
        if let Err(e) = self.send(msg).await {
            debug!(error = %e, "Could not notify client.");
        }
    }

    /// Queues a ping without waiting.
    pub fn probe(&self) -> Probe {
        match self.tx.try_send(Frame::Ping(Bytes::new())) {
            Ok(()) => Probe::Sent,
            Err(TrySendError::Full(_)) => Probe::Busy,
            Err(TrySendError::Closed(_)) => Probe::Gone,
        }
    }
}

/// Handle for queueing frames to the backend.
#[derive(Clone, Debug)]
pub struct BackendOutbox {
    tx: mpsc::Sender<Frame>,
}

impl BackendOutbox {
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, msg: &BackendMessage) -> Result<(), TransportError> {
        let text = serde_json::to_string(msg)?;
        self.tx
            .send(Frame::Text(text))
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use std::task::{Context, Poll};

    fn capture_sink() -> (FrameSink, fmpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = fmpsc::unbounded::<Frame>();
        let sink = tx.sink_map_err(|e| TransportError::Write(e.to_string()));
        (Box::pin(sink), rx)
    }

    #[tokio::test]
    async fn writer_flushes_queue_on_cancel_then_closes() {
        let (sink, mut written) = capture_sink();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let outbox = ClientOutbox::new(tx);
        outbox.send(ServerMessage::fail("Connection to AI service lost")).await.unwrap();
        cancel.cancel();

        run_writer("client", sink, rx, cancel).await;

        let first = written.next().await.unwrap();
        assert!(matches!(first, Frame::Text(ref t) if t.contains("\"fail\"")));
        assert_eq!(written.next().await, Some(Frame::Close));
        assert_eq!(written.next().await, None);
    }

    /// A peer that never accepts another frame.
    struct StalledSink;

    impl Sink<Frame> for StalledSink {
        type Error = TransportError;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _: Frame) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
    }

    #[tokio::test(start_paused = true)]
    async fn writer_blocked_on_stalled_peer_exits_after_cancel() {
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(run_writer("client", Box::pin(StalledSink), rx, cancel.clone()));

        let outbox = ClientOutbox::new(tx);
        outbox.send(ServerMessage::audio_received()).await.unwrap();
        outbox.send(ServerMessage::fail("bye")).await.unwrap();
        tokio::task::yield_now().await;

        cancel.cancel();
        tokio::time::timeout(CLOSE_GRACE * 3, writer)
            .await
            .expect("writer still blocked after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn write_failure_cancels_session() {
        let (sink, written) = capture_sink();
        drop(written);
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        ClientOutbox::new(tx)
            .send(ServerMessage::audio_received())
            .await
            .unwrap();
        run_writer("client", sink, rx, cancel.clone()).await;

        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn probe_reports_full_and_closed_queues() {
        let (tx, rx) = mpsc::channel(1);
        let outbox = ClientOutbox::new(tx);

        assert_eq!(outbox.probe(), Probe::Sent);
        assert_eq!(outbox.probe(), Probe::Busy);
        drop(rx);
        assert_eq!(outbox.probe(), Probe::Gone);
        assert!(matches!(
            outbox.send(ServerMessage::audio_received()).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn backend_outbox_serializes_live_messages() {
        let (tx, mut rx) = mpsc::channel(1);
        let outbox = BackendOutbox::new(tx);
        outbox.send(&BackendMessage::end_of_stream()).await.unwrap();

        match rx.recv().await {
            Some(Frame::Text(text)) => assert_eq!(text, r#"{"realtimeInput":{"endOfStream":true}}"#),
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
