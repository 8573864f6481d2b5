use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use slipstream_core::net::messages::{ClientMessage, JoinRoomMsg, ServerMessage};
use slipstream_core::net::protocol::{
    MAX_MESSAGE_SIZE, decode_client_message, encode_server_message, negotiate_protocol_version,
};
use slipstream_core::player::PlayerId;

use crate::game_loop::GameCommand;
use crate::state::{AppState, ConnectionGuard};

/// How long a fresh socket may take to send its `JoinRoom`.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let max_ws = state.config.limits.max_ws_connections;
    let Some(guard) = ConnectionGuard::try_acquire(&state.ws_connection_count, max_ws) else {
        tracing::warn!(max = max_ws, "WS connection limit reached");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let span = tracing::info_span!("ws", conn_id = %Uuid::new_v4());
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, guard).instrument(span))
}

async fn handle_socket(socket: WebSocket, state: AppState, _guard: ConnectionGuard) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // The first message must be a JoinRoom.
    let Some(join) = read_join(&mut ws_receiver).await else {
        tracing::debug!("Socket closed before a valid JoinRoom");
        return;
    };
    let protocol_version = negotiate_protocol_version(join.protocol_version);

    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.player_message_buffer);
    let ticket = {
        let mut rooms = state.rooms.write().await;
        rooms.join(&join, protocol_version, tx)
    };
    let ticket = match ticket {
        Ok(ticket) => ticket,
        Err(e) => {
            tracing::info!(room = %join.room_id, error = %e, "Join refused");
            let frame = CloseFrame {
                code: close_code::POLICY,
                reason: e.to_string().into(),
            };
            let _ = ws_sender.send(Message::Close(Some(frame))).await;
            return;
        },
    };
    let room_id = join.room_id;
    let player_id = ticket.player.id;

    let joined = match tokio::time::timeout(JOIN_TIMEOUT, ticket.joined).await {
        Ok(Ok(joined)) => joined,
        _ => {
            tracing::warn!(player_id, room = %room_id, "Room session did not answer join");
            state.rooms.write().await.leave(&room_id, player_id);
            return;
        },
    };
    let sent = match encode_server_message(&ServerMessage::RoomJoined(Box::new(joined))) {
        Ok(data) => ws_sender.send(Message::Binary(data.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode RoomJoined");
            false
        },
    };
    if !sent {
        leave_and_announce(&state, &room_id, player_id).await;
        return;
    }
    tracing::info!(player_id, room = %room_id, protocol_version, "Player connected");

    state.rooms.read().await.broadcast_player_list(&room_id);

    let writer = spawn_writer(ws_sender, rx);
    read_loop(&mut ws_receiver, &state, &room_id, player_id).await;

    leave_and_announce(&state, &room_id, player_id).await;
    writer.abort();
    tracing::info!(player_id, room = %room_id, "Player disconnected");
}

async fn read_join(ws_receiver: &mut SplitStream<WebSocket>) -> Option<JoinRoomMsg> {
    let first = tokio::time::timeout(JOIN_TIMEOUT, ws_receiver.next())
        .await
        .ok()??;
    let Ok(Message::Binary(data)) = first else {
        return None;
    };
    match decode_client_message(&data) {
        Ok(ClientMessage::JoinRoom(join)) => Some(join),
        Ok(other) => {
            tracing::debug!(?other, "Expected JoinRoom first");
            None
        },
        Err(e) => {
            tracing::debug!(error = %e, "Malformed first frame");
            None
        },
    }
}

async fn leave_and_announce(state: &AppState, room_id: &str, player_id: PlayerId) {
    let mut rooms = state.rooms.write().await;
    if !rooms.leave(room_id, player_id) {
        rooms.broadcast_player_list(room_id);
    }
}

fn spawn_writer(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if ws_sender.send(Message::Binary(data)).await.is_err() {
                break;
            }
        }
    })
}

async fn read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
    room_id: &str,
    player_id: PlayerId,
) {
    while let Some(Ok(msg)) = ws_receiver.next().await {
        let data = match msg {
            Message::Binary(d) => d,
            Message::Close(_) => break,
            _ => continue,
        };

        // Malformed frames are dropped; the connection stays up.
        let client_msg = match decode_client_message(&data) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(player_id, room = room_id, error = %e, "Dropping malformed frame");
                continue;
            },
        };

        let cmd = match client_msg {
            ClientMessage::InputFrame(frame) => GameCommand::Input { player_id, frame },
            ClientMessage::AbilityActivate(msg) => GameCommand::Ability { player_id, msg },
            ClientMessage::LeaveRoom(leave) => {
                if leave.player_id == player_id {
                    break;
                }
                tracing::debug!(player_id, other = leave.player_id, "Ignoring leave for another player");
                continue;
            },
            ClientMessage::JoinRoom(_) => {
                tracing::debug!(player_id, room = room_id, "Ignoring JoinRoom on a joined socket");
                continue;
            },
        };
        state.rooms.read().await.route(room_id, cmd);
    }
}
