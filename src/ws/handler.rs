//! WebSocket upgrade handler

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::{verify_jwt, AuthError};
use crate::ingest::{PacketOutcome, ParticipantSession};
use crate::integrity::ParticipantIdentity;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::server_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Outbound messages buffered per connection before new ones are dropped
const OUTBOUND_QUEUE: usize = 256;

/// Level assigned to participants until a progression service exists
const DEFAULT_LEVEL: u8 = 1;

/// How long a closing connection may spend flushing queued messages
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    // Verify JWT token before upgrading
    let claims = match verify_jwt(&query.token, &state.config.jwt_secret) {
        Ok(claims) => claims,
        Err(e) => {
            error!(error = %e, ip = %addr.ip(), "WebSocket auth failed");
            return e.into_response();
        }
    };

    if state.bans.is_banned(claims.sub) {
        warn!(account_id = %claims.sub, ip = %addr.ip(), "Banned account refused");
        return AuthError::Banned.into_response();
    }

    info!(account_id = %claims.sub, "WebSocket upgrade for authenticated account");
    let identity = ParticipantIdentity {
        participant_id: Uuid::new_v4(),
        account_id: claims.sub,
        ip_address: addr.ip().to_string(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, identity, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, identity: ParticipantIdentity, state: AppState) {
    let participant_id = identity.participant_id;
    info!(participant_id = %participant_id, account_id = %identity.account_id, "New WebSocket connection");

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let kick = Arc::new(Notify::new());

    let session = state
        .pipeline
        .open_session(identity, DEFAULT_LEVEL, outbound_tx, kick.clone());

    let (ws_sink, ws_stream) = socket.split();

    // Spawn writer task: outbound queue -> WebSocket
    let mut writer_handle = tokio::spawn(write_loop(participant_id, ws_sink, outbound_rx));

    let session = run_session(&state, session, ws_stream, &kick).await;

    // Removing the roster entry drops the last sender so the writer can flush and exit
    state.pipeline.close_session(session);
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    info!(participant_id = %participant_id, "WebSocket connection closed");
}

/// Reader loop: WebSocket -> ingestion pipeline, until close or kick
async fn run_session(
    state: &AppState,
    mut session: ParticipantSession,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    kick: &Notify,
) -> ParticipantSession {
    let participant_id = session.identity.participant_id;
    let rate_limiter = PlayerRateLimiter::new();

    loop {
        let frame = tokio::select! {
            _ = kick.notified() => {
                info!(participant_id = %participant_id, "Connection closed by server");
                break;
            }
            frame = ws_stream.next() => frame,
        };

        let Some(result) = frame else {
            break;
        };

        match result {
            Ok(Message::Text(text)) => {
                let client_msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(participant_id = %participant_id, error = %e, "Failed to parse client message");
                        state.world.roster().send_to(
                            participant_id,
                            ServerMsg::Error {
                                code: "bad_message".to_string(),
                                message: e.to_string(),
                            },
                        );
                        continue;
                    }
                };

                let allowed = match client_msg {
                    ClientMsg::UseAbility { .. } => rate_limiter.check_ability(),
                    _ => rate_limiter.check_motion(),
                };
                if !allowed {
                    warn!(participant_id = %participant_id, "Rate limited input message");
                    continue;
                }

                let outcome = state.pipeline.handle(&mut session, client_msg, server_millis());
                if outcome != PacketOutcome::Accepted {
                    debug!(participant_id = %participant_id, ?outcome, "Packet not accepted");
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(participant_id = %participant_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(participant_id = %participant_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(participant_id = %participant_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    session
}

/// Writer loop: drains the outbound queue until every sender is gone
async fn write_loop(
    participant_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = outbound_rx.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(participant_id = %participant_id, error = %e, "WebSocket send failed");
            return;
        }
    }
    let _ = ws_sink.send(Message::Close(None)).await;
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
