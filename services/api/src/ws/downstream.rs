//! Client → backend relay.

use super::protocol::{ClientMessage, ServerMessage};
use super::session::SessionContext;
use super::transport::{Frame, FrameStream, TransportError};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use buddy_core::tools::GET_CURRENT_WEATHER;
use futures_util::StreamExt;
use serde_json::Map;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};
use vertex_live::ClientMessage as BackendMessage;

pub const AUDIO_MIME: &str = "audio/webm";
pub const IMAGE_MIME: &str = "image/jpeg";

/// Phrases that only make sense with the user's position.
const LOCATION_KEYWORDS: &[&str] = &[
    "di dekat",
    "terdekat",
    "sekitar sini",
    "di sekitar",
    "dekat sini",
    "di mana",
    "lokasi",
    "tempat",
    "jarak",
    "restoran",
    "kafe",
    "mall",
    "toko",
    "hotel",
    "wisata",
    "kuliner",
    "makanan",
    "minuman",
    "kopi",
    "nongkrong",
];

const WEATHER_KEYWORDS: &[&str] = &["cuaca", "weather"];

fn mentions_any(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

pub fn needs_location(text: &str) -> bool {
    mentions_any(text, LOCATION_KEYWORDS)
}

pub fn asks_weather(text: &str) -> bool {
    mentions_any(text, WEATHER_KEYWORDS)
}

/// Reads client frames until the client goes away or the session is cancelled.
pub async fn run(ctx: Arc<SessionContext>, mut stream: FrameStream) -> Result<(), TransportError> {
    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(()),
            next = stream.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                ctx.client
                    .notify(ServerMessage::fail(format!("Client connection error: {e}")))
                    .await;
                return Err(e);
            }
            None => {
                info!("Client stream ended.");
                return Ok(());
            }
        };

        ctx.alive.store(true, Ordering::Release);

        match frame {
            Frame::Binary(data) => {
                debug!(bytes = data.len(), "Forwarding binary audio chunk.");
                let chunk = BackendMessage::media_chunk(AUDIO_MIME, BASE64.encode(&data));
                ctx.backend.send(&chunk).await?;
                ctx.client.send(ServerMessage::audio_received()).await?;
            }
            Frame::Text(text) => handle_text(&ctx, &text).await?,
            Frame::Ping(_) | Frame::Pong(_) => {}
            Frame::Close => {
                info!("Client sent close frame.");
                return Ok(());
            }
        }
    }
}

async fn handle_text(ctx: &SessionContext, raw: &str) -> Result<(), TransportError> {
    let msg = match ClientMessage::parse(raw) {
        Ok(msg) => msg,
        Err(e) if e.is_location() => {
            warn!(error = %e, "Rejecting location update.");
            return ctx
                .client
                .send(ServerMessage::invalid_location(e.to_string()))
                .await;
        }
        Err(e) => {
            warn!(error = %e, "Skipping client message.");
            return Ok(());
        }
    };

    match msg {
        ClientMessage::Location(coordinates) => {
            ctx.location.set(coordinates).await;
            info!(%coordinates, "Location updated.");
            ctx.client.send(ServerMessage::location_updated()).await
        }
        ClientMessage::Prompt(text) => handle_prompt(ctx, text).await,
        ClientMessage::Text(text) => ctx.backend.send(&BackendMessage::user_text(text)).await,
        ClientMessage::Audio(data) => {
            ctx.backend
                .send(&BackendMessage::media_chunk(AUDIO_MIME, data))
                .await?;
            ctx.client.send(ServerMessage::audio_received()).await
        }
        ClientMessage::AudioEnd => ctx.backend.send(&BackendMessage::end_of_stream()).await,
        ClientMessage::Image(data) => {
            ctx.backend
                .send(&BackendMessage::media_chunk(IMAGE_MIME, data))
                .await
        }
    }
}

/// Free-form prompts pass two gates before reaching the model: location
/// questions wait for a location, weather questions are answered directly.
async fn handle_prompt(ctx: &SessionContext, text: String) -> Result<(), TransportError> {
    let location = ctx.location.get().await;

    if needs_location(&text) && location.is_none() {
        debug!("Prompt needs a location, asking the client for one.");
        return ctx.client.send(ServerMessage::location_request()).await;
    }

    if asks_weather(&text) {
        let result = ctx
            .tools
            .invoke(GET_CURRENT_WEATHER, &Map::new(), location)
            .await;
        let reply = match result.outcome {
            Ok(data) => ServerMessage::weather_result(data),
            Err(e) => ServerMessage::weather_failed(e.to_string()),
        };
        return ctx.client.send(reply).await;
    }

    debug!(chars = text.len(), "Forwarding prompt.");
    ctx.backend.send(&BackendMessage::user_text(text)).await
}
