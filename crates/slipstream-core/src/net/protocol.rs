use serde::Serialize;
use serde::de::DeserializeOwned;

use super::messages::{
    AbilityActivateMsg, ClientMessage, InputFrame, JoinRoomMsg, LeaveRoomMsg, MessageType,
    PlayerListMsg, RaceEventMsg, RoomJoinedMsg, ServerMessage, ServerSnapshot,
};

/// Latest protocol version.
pub const PROTOCOL_VERSION: u8 = 2;

/// Versions a peer may negotiate. Anything else coerces to the latest.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[u8] = &[1, 2];

/// Client input / server snapshot rate in Hz.
pub const DEFAULT_NETWORK_TICK_HZ: u32 = 20;

/// Simulated seconds covered by one input frame, on both sides.
pub const INPUT_FRAME_DT: f32 = 1.0 / DEFAULT_NETWORK_TICK_HZ as f32;

/// Maximum message size in bytes, including the type prefix.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty message")]
    EmptyMessage,
    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),
    #[error("payload too large: {0} bytes (max {MAX_MESSAGE_SIZE})")]
    PayloadTooLarge(usize),
    #[error("serialize error: {0}")]
    Serialize(String),
    #[error("deserialize error: {0}")]
    Deserialize(String),
}

/// Settle the version for a connection. Missing or unrecognized values fall
/// forward to [`PROTOCOL_VERSION`] instead of failing the join.
pub fn negotiate_protocol_version(requested: Option<u8>) -> u8 {
    match requested {
        Some(v) if SUPPORTED_PROTOCOL_VERSIONS.contains(&v) => v,
        _ => PROTOCOL_VERSION,
    }
}

/// Encode a payload behind a 1-byte type prefix. Fields are written by name
/// so the canonical camelCase keys are preserved on the wire.
pub fn encode_message<T: Serialize>(
    msg_type: MessageType,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload_bytes =
        rmp_serde::to_vec_named(payload).map_err(|e| ProtocolError::Serialize(e.to_string()))?;
    let total = 1 + payload_bytes.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(msg_type as u8);
    buf.extend_from_slice(&payload_bytes);
    Ok(buf)
}

pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ClientMessage::JoinRoom(m) => encode_message(MessageType::JoinRoom, m),
        ClientMessage::InputFrame(m) => encode_message(MessageType::InputFrame, m),
        ClientMessage::AbilityActivate(m) => encode_message(MessageType::AbilityActivate, m),
        ClientMessage::LeaveRoom(m) => encode_message(MessageType::LeaveRoom, m),
    }
}

pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ServerMessage::RoomJoined(m) => encode_message(MessageType::RoomJoined, m.as_ref()),
        ServerMessage::ServerSnapshot(m) => {
            encode_message(MessageType::ServerSnapshot, m.as_ref())
        },
        ServerMessage::RaceEvent(m) => encode_message(MessageType::RaceEvent, m),
        ServerMessage::PlayerList(m) => encode_message(MessageType::PlayerList, m),
    }
}

/// Read the type byte of a raw frame.
pub fn decode_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    let &first = data.first().ok_or(ProtocolError::EmptyMessage)?;
    MessageType::from_byte(first).ok_or(ProtocolError::UnknownMessageType(first))
}

/// Decode the MessagePack payload following the type byte.
pub fn decode_payload<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(data.len()));
    }
    let payload = data.get(1..).ok_or(ProtocolError::EmptyMessage)?;
    rmp_serde::from_slice(payload).map_err(|e| ProtocolError::Deserialize(e.to_string()))
}

pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    match decode_message_type(data)? {
        MessageType::JoinRoom => Ok(ClientMessage::JoinRoom(decode_payload::<JoinRoomMsg>(
            data,
        )?)),
        MessageType::InputFrame => Ok(ClientMessage::InputFrame(decode_payload::<InputFrame>(
            data,
        )?)),
        MessageType::AbilityActivate => Ok(ClientMessage::AbilityActivate(decode_payload::<
            AbilityActivateMsg,
        >(data)?)),
        MessageType::LeaveRoom => Ok(ClientMessage::LeaveRoom(decode_payload::<LeaveRoomMsg>(
            data,
        )?)),
        other => Err(ProtocolError::UnknownMessageType(other as u8)),
    }
}

pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, ProtocolError> {
    match decode_message_type(data)? {
        MessageType::RoomJoined => Ok(ServerMessage::RoomJoined(Box::new(decode_payload::<
            RoomJoinedMsg,
        >(data)?))),
        MessageType::ServerSnapshot => Ok(ServerMessage::ServerSnapshot(Box::new(
            decode_payload::<ServerSnapshot>(data)?,
        ))),
        MessageType::RaceEvent => Ok(ServerMessage::RaceEvent(decode_payload::<RaceEventMsg>(
            data,
        )?)),
        MessageType::PlayerList => Ok(ServerMessage::PlayerList(decode_payload::<
            PlayerListMsg,
        >(data)?)),
        other => Err(ProtocolError::UnknownMessageType(other as u8)),
    }
}
