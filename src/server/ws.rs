//! WebSocket channel endpoint
//!
//! Each socket is split into a reader loop, which decodes one action per text
//! frame and submits it, and a writer task, which drains the connection's
//! broadcast queue into the socket. Either side failing closes the channel.

use super::peer::PeerAddr;
use super::AppState;
use crate::broadcast::{ConnectionId, ConnectionState, ErrorShape, Frame, Subscription};
use crate::polls::Action;
use crate::service::{Outcome, PollService};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

/// `GET /ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    peer: PeerAddr,
) -> impl IntoResponse {
    debug!(peer = %peer, state = %ConnectionState::Connecting, "websocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, peer: PeerAddr) {
    let Subscription { id, frames } = match state.service.attach(peer.to_string()).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(peer = %peer, error = %e, "rejecting channel");
            if let Ok(text) = serde_json::to_string(&e.to_shape()) {
                let _ = socket.send(Message::Text(text.into())).await;
            }
            let _ = socket.close().await;
            return;
        }
    };

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_frames(sink, frames, Arc::clone(&state.service), id));

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                debug!(connection_id = %id, "closing channel for shutdown");
                break;
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => handle_text(&state, id, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %id, error = %e, "receive failed");
                    break;
                }
            }
        }
    }

    // Dropping the registered sender lets the writer flush and close.
    state.service.detach(id);
    if let Err(e) = writer.await {
        warn!(connection_id = %id, error = %e, "writer task failed");
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: UnboundedReceiver<Frame>,
    service: Arc<PollService>,
    id: ConnectionId,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = sink.send(Message::Text(frame.to_string().into())).await {
            debug!(connection_id = %id, error = %e, "send failed, dropping channel");
            service.detach(id);
            return;
        }
    }
    let _ = sink.close().await;
}

async fn handle_text(state: &AppState, id: ConnectionId, text: &str) {
    let report = state.ws.report_rejections;

    let action = match Action::decode(text) {
        Ok(Some(action)) => action,
        Ok(None) => {
            state.service.record_malformed();
            if report {
                state.service.reply_error(
                    id,
                    &ErrorShape::new("unsupported_type", "message type is not supported"),
                );
            }
            return;
        }
        Err(e) => {
            debug!(connection_id = %id, error = %e, "ignoring malformed message");
            state.service.record_malformed();
            if report {
                state
                    .service
                    .reply_error(id, &ErrorShape::new(e.code(), e.to_string()));
            }
            return;
        }
    };

    match state.service.submit(&action).await {
        Ok(Outcome::Applied(_)) => {}
        Ok(Outcome::Ignored(rejection)) => {
            if report {
                state
                    .service
                    .reply_error(id, &ErrorShape::new(rejection.code(), rejection.to_string()));
            }
        }
        Err(e) => {
            warn!(connection_id = %id, kind = action.kind(), error = %e, "action failed");
            state.service.reply_error(id, &e.to_shape());
        }
    }
}
