//! Client session: one live connection bridged to the hub and the capture protocol
//!
//! A session runs two duties. The send duty drains the outbound queue the hub
//! writes into; the receive duty decodes client messages and runs captures.
//! Whichever ends first takes the other down, and the session always leaves
//! the hub before it returns.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{self, EventBus};
use crate::game::CaptureService;
use crate::store::PlayerId;
use crate::util::rate_limit::SessionRateLimiter;
use crate::ws::hub::HubHandle;
use crate::ws::protocol::{IncomingMessage, ServerMsg, CAPTURE};

/// Outbound messages buffered per session before the hub drops it
pub const OUTBOUND_CAPACITY: usize = 256;

/// How long a closing session may spend flushing its outbound queue
const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a session talks to
#[derive(Clone)]
pub struct SessionContext {
    pub hub: HubHandle,
    pub capture: Arc<CaptureService>,
    pub bus: Arc<dyn EventBus>,
}

/// Run one session to completion over a split connection
pub async fn run_session<S, R, E>(sink: S, stream: R, ctx: SessionContext)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let session_id = Uuid::new_v4();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    ctx.hub.register(session_id, outbound_tx);

    info!(session_id = %session_id, "Session started");

    let mut send_handle = tokio::spawn(send_duty(session_id, sink, outbound_rx));
    let mut receive_handle = tokio::spawn(receive_duty(session_id, stream, ctx.clone()));

    tokio::select! {
        _ = &mut receive_handle => {
            // The hub drops our queue, the send duty drains it and closes the sink
            ctx.hub.unregister(session_id);
            if tokio::time::timeout(SEND_DRAIN_TIMEOUT, &mut send_handle).await.is_err() {
                warn!(session_id = %session_id, "Send duty did not finish, aborting");
                send_handle.abort();
            }
        }
        _ = &mut send_handle => {
            receive_handle.abort();
            ctx.hub.unregister(session_id);
        }
    }

    info!(session_id = %session_id, "Session closed");
}

/// Write queued envelopes to the connection until the queue closes or a write fails
async fn send_duty<S>(session_id: Uuid, mut sink: S, mut outbound: mpsc::Receiver<Bytes>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(payload) = outbound.recv().await {
        let text = match String::from_utf8(payload.to_vec()) {
            Ok(text) => text,
            Err(_) => {
                warn!(session_id = %session_id, "Dropping non UTF-8 envelope");
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            debug!(session_id = %session_id, error = %e, "WebSocket send failed");
            return;
        }
    }

    let _ = sink.close().await;
}

/// Read and handle client messages until the connection fails or sends garbage
async fn receive_duty<R, E>(session_id: Uuid, mut stream: R, ctx: SessionContext)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let rate_limiter = SessionRateLimiter::new();

    while let Some(result) = stream.next().await {
        let raw = match result {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "WebSocket read failed");
                break;
            }
        };

        let msg: IncomingMessage = match serde_json::from_slice(&raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Malformed client message, closing");
                break;
            }
        };

        if msg.kind != CAPTURE {
            debug!(session_id = %session_id, kind = %msg.kind, "Ignoring message");
            continue;
        }

        if !rate_limiter.check_input() {
            warn!(session_id = %session_id, "Rate limited capture");
            continue;
        }

        let (Some(tile_id), Some(user_id)) = (msg.tile_id, msg.user_id) else {
            debug!(session_id = %session_id, "Capture without tileId or userId");
            continue;
        };

        // Claim and publish run in their own task: aborting this duty must not
        // cut a committed claim off from its tile_update
        let capture = tokio::spawn(capture_and_publish(session_id, tile_id, user_id, ctx.clone()));
        if let Err(e) = capture.await {
            error!(session_id = %session_id, tile_id, error = %e, "Capture task failed");
        }
    }
}

/// Run a capture and publish the new tile state on success.
/// Failures are not reported back to the client.
async fn capture_and_publish(
    session_id: Uuid,
    tile_id: i32,
    user_id: PlayerId,
    ctx: SessionContext,
) {
    match ctx.capture.capture(tile_id, &user_id).await {
        Ok(tile) => {
            let update = ServerMsg::tile_update(&tile);
            if let Err(e) = bus::publish_msg(ctx.bus.as_ref(), &update).await {
                error!(tile_id, user_id = %user_id, error = %e, "Failed to publish tile update");
            }
        }
        Err(e) => {
            debug!(session_id = %session_id, tile_id, user_id = %user_id, error = %e, "Capture rejected");
        }
    }
}
