//! Backend → client relay.

use super::protocol::ServerMessage;
use super::session::SessionContext;
use super::transport::{Frame, FrameStream, TransportError};
use buddy_core::StreamAccumulator;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vertex_live::{ClientMessage as BackendMessage, FunctionCall, ServerEvent};

/// Reads backend frames until the backend goes away or the session is cancelled.
pub async fn run(ctx: Arc<SessionContext>, mut stream: FrameStream) -> Result<(), TransportError> {
    let mut turn = StreamAccumulator::new();

    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(()),
            next = stream.next() => next,
        };

        let decoded = match next {
            Some(Ok(Frame::Text(text))) => ServerEvent::decode(&text),
            Some(Ok(Frame::Binary(data))) => ServerEvent::decode_bytes(&data),
            Some(Ok(Frame::Ping(_) | Frame::Pong(_))) => continue,
            Some(Ok(Frame::Close)) | None => {
                info!("AI service closed the connection.");
                ctx.client
                    .notify(ServerMessage::fail("Connection to AI service closed"))
                    .await;
                return Ok(());
            }
            Some(Err(e)) => {
                ctx.client
                    .notify(ServerMessage::fail(format!("Connection to AI service lost: {e}")))
                    .await;
                return Err(e);
            }
        };

        let event = match decoded {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Skipping malformed backend frame.");
                ctx.client
                    .send(ServerMessage::fail("Error processing AI response"))
                    .await?;
                continue;
            }
        };

        tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(()),
            handled = handle_event(&ctx, &mut turn, event) => handled?,
        }
    }
}

async fn handle_event(
    ctx: &SessionContext,
    turn: &mut StreamAccumulator,
    event: ServerEvent,
) -> Result<(), TransportError> {
    match event {
        ServerEvent::SetupComplete => {
            info!("AI service acknowledged setup.");
            ctx.client.send(ServerMessage::connected()).await
        }
        ServerEvent::ToolCall(calls) => run_tool_calls(ctx, calls).await,
        ServerEvent::TurnComplete { trailing } => {
            for text in &trailing {
                turn.push(text);
            }
            let Some(text) = turn.complete_turn() else {
                debug!("Turn completed without text.");
                return Ok(());
            };

            let audio = match ctx.speech.synthesize(&text, &ctx.language_code).await {
                Ok(audio) => Some(audio),
                Err(e) => {
                    warn!(error = ?e, "Speech synthesis failed, sending text only.");
                    None
                }
            };
            ctx.client.send(ServerMessage::success(text, audio)).await
        }
        ServerEvent::ContentParts(texts) => {
            let mut grew = false;
            for text in &texts {
                grew |= turn.push(text);
            }
            if grew {
                ctx.client
                    .send(ServerMessage::streaming(turn.partial()))
                    .await?;
            }
            Ok(())
        }
        ServerEvent::GenerationComplete => {
            debug!("Generation complete.");
            Ok(())
        }
        ServerEvent::Unrecognized => {
            warn!("Unhandled backend frame, dropping.");
            Ok(())
        }
    }
}

/// Executes every requested call in order and answers them in one frame.
async fn run_tool_calls(ctx: &SessionContext, calls: Vec<FunctionCall>) -> Result<(), TransportError> {
    if calls.len() > 1 {
        info!(count = calls.len(), "Running multiple function calls in sequence.");
    }

    let mut responses = Vec::with_capacity(calls.len());
    for call in calls {
        let location = ctx.location.get().await;
        let result = ctx.tools.invoke(&call.name, &call.args, location).await;

        if let Err(e) = &result.outcome {
            ctx.client
                .send(ServerMessage::fail(format!(
                    "Error executing function {}: {e}",
                    call.name
                )))
                .await?;
        }
        responses.push(result.into_function_response(call.id));
    }

    ctx.backend
        .send(&BackendMessage::tool_response(responses))
        .await
}
