use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use slipstream_core::net::messages::{ClientMessage, JoinRoomMsg, RoomJoinedMsg, ServerMessage};
use slipstream_core::net::protocol::{decode_server_message, encode_client_message};

use slipstream_server::build_app;
use slipstream_server::config::{RoomsConfig, ServerConfig};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server whose rooms sit in the lobby.
    pub async fn new() -> Self {
        let mut config = ServerConfig::default();
        config.rooms.lobby_wait_ms = 60_000;
        Self::from_config(config).await
    }

    /// Start a test server whose rooms race as soon as someone joins.
    pub async fn racing() -> Self {
        let config = ServerConfig {
            rooms: RoomsConfig {
                lobby_wait_ms: 0,
                countdown_ms: 100,
                ..RoomsConfig::default()
            },
            ..ServerConfig::default()
        };
        Self::from_config(config).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, _state) = build_app(config);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _shutdown: handle,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

pub fn join_msg(name: &str, room_id: &str) -> JoinRoomMsg {
    JoinRoomMsg {
        player_name: name.to_string(),
        room_id: room_id.to_string(),
        protocol_version: None,
        selected_color_id: None,
        selected_vehicle_id: None,
    }
}

/// Send a ClientMessage.
pub async fn ws_send_client_msg(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Binary(encoded.into())).await.unwrap();
}

/// Join `room_id` and return the RoomJoined payload.
pub async fn ws_join(stream: &mut WsStream, name: &str, room_id: &str) -> RoomJoinedMsg {
    ws_send_client_msg(stream, &ClientMessage::JoinRoom(join_msg(name, room_id))).await;
    match ws_read_server_msg(stream).await {
        ServerMessage::RoomJoined(joined) => *joined,
        other => panic!("Expected RoomJoined, got: {other:?}"),
    }
}

/// Read raw binary data from a WebSocket stream (5s timeout).
pub async fn ws_read_raw(stream: &mut WsStream) -> Vec<u8> {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Read the next ServerMessage from a WebSocket stream (5s timeout).
pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    let data = ws_read_raw(stream).await;
    decode_server_message(&data).unwrap()
}

/// Read messages until one matches, skipping snapshots and anything else.
pub async fn ws_read_until<T>(
    stream: &mut WsStream,
    mut pick: impl FnMut(ServerMessage) -> Option<T>,
) -> T {
    for _ in 0..500 {
        if let Some(found) = pick(ws_read_server_msg(stream).await) {
            return found;
        }
    }
    panic!("No matching message within 500 reads");
}

/// Wait for the server to close the socket, returning the close reason.
pub async fn ws_expect_close(stream: &mut WsStream) -> String {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(frame))) => {
                    return frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default();
                },
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return String::new(),
            }
        }
    })
    .await
    .expect("Timed out waiting for close")
}
