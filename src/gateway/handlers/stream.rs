//! WebSocket subscription surface.
//!
//! One socket per client. After a token-authenticated upgrade the client may
//! subscribe to its running match's index projection; pending-match signals
//! for the authenticated user are pushed unconditionally. Socket teardown
//! runs the best-effort disconnect hooks: queue entry removal and presence
//! clearing.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::super::state::AppState;
use super::super::types::ApiError;
use crate::models::{MatchIndex, PendingMatchSignal};

/// Frames the client sends.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WsCommand {
    /// Follow `active_matches/{match_id}`.
    SubscribeMatch { match_id: String },
    Heartbeat,
}

/// Frames the server sends.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsEvent {
    MatchIndex {
        match_id: String,
        #[serde(flatten)]
        index: MatchIndex,
    },
    PendingMatch(PendingMatchSignal),
    Error {
        message: String,
    },
}

/// WebSocket upgrade endpoint
///
/// GET /ws/duel?token={jwt}
///
/// Browsers cannot set headers on WebSocket requests, so the bearer token
/// travels as a query parameter.
pub async fn ws_duel(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = params.get("token") else {
        return ApiError::unauthorized("Missing token query parameter").into_response();
    };
    match state.auth.verify_token(token) {
        Ok(user) => {
            let user_id = user.user_id;
            ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
        }
        Err(_) => ApiError::unauthorized("Invalid or expired token").into_response(),
    }
}

type IndexSubscription = Option<(String, watch::Receiver<MatchIndex>)>;

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (sub_id, mut pending_rx) = state.realtime.subscribe_pending(&user_id);
    state.realtime.heartbeat(&user_id);
    tracing::info!(%user_id, "websocket connected");

    let mut index_sub: IndexSubscription = None;

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let outbound = handle_command(&state, &user_id, &text, &mut index_sub);
                        if let Some(event) = outbound {
                            if send_event(&mut sink, &event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary: nothing to do
                    Some(Err(e)) => {
                        tracing::debug!(%user_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
            Some(signal) = pending_rx.recv() => {
                if send_event(&mut sink, &WsEvent::PendingMatch(signal)).await.is_err() {
                    break;
                }
            }
            changed = index_changed(&mut index_sub) => {
                match changed {
                    Ok(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    // Sender dropped: the match reached a terminal state.
                    Err(()) => index_sub = None,
                }
            }
        }
    }

    // Best-effort disconnect hooks.
    state.realtime.unsubscribe_pending(&user_id, sub_id);
    state.matchmaker.leave(&user_id);
    state.realtime.clear_presence(&user_id);
    tracing::info!(%user_id, "websocket disconnected");
}

fn handle_command(
    state: &Arc<AppState>,
    user_id: &str,
    text: &str,
    index_sub: &mut IndexSubscription,
) -> Option<WsEvent> {
    match serde_json::from_str::<WsCommand>(text) {
        Ok(WsCommand::SubscribeMatch { match_id }) => {
            match state.realtime.subscribe_match(&match_id) {
                Some(rx) => {
                    // Send the latest value right away; subscribers must not
                    // depend on intermediate values.
                    let index = *rx.borrow();
                    *index_sub = Some((match_id.clone(), rx));
                    Some(WsEvent::MatchIndex { match_id, index })
                }
                None => Some(WsEvent::Error {
                    message: format!("match {match_id} has no live channel"),
                }),
            }
        }
        Ok(WsCommand::Heartbeat) => {
            state.realtime.heartbeat(user_id);
            None
        }
        Err(e) => Some(WsEvent::Error {
            message: format!("unrecognized frame: {e}"),
        }),
    }
}

/// Wait for the next index change on the active subscription. Pends forever
/// when there is none, which disables the branch until a subscribe lands.
async fn index_changed(index_sub: &mut IndexSubscription) -> Result<WsEvent, ()> {
    match index_sub {
        Some((match_id, rx)) => match rx.changed().await {
            Ok(()) => Ok(WsEvent::MatchIndex {
                match_id: match_id.clone(),
                index: *rx.borrow(),
            }),
            Err(_) => Err(()),
        },
        None => std::future::pending().await,
    }
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &WsEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).unwrap_or_default();
    sink.send(Message::Text(json.into())).await
}
