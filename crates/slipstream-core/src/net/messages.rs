use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ability::AbilityLedgerEntry;
use crate::catalog::HazardKind;
use crate::effects::EffectSet;
use crate::motion::{ControlState, MotionState};
use crate::player::{Player, PlayerId};
use crate::race::{RaceEventKind, RaceProgress, RaceStateSnapshot};

/// Network message type discriminator (first byte on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Client -> Server
    JoinRoom = 0x01,
    InputFrame = 0x02,
    AbilityActivate = 0x03,
    LeaveRoom = 0x04,

    // Server -> Client
    RoomJoined = 0x10,
    ServerSnapshot = 0x11,
    RaceEvent = 0x12,
    PlayerList = 0x13,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::JoinRoom),
            0x02 => Some(Self::InputFrame),
            0x03 => Some(Self::AbilityActivate),
            0x04 => Some(Self::LeaveRoom),
            0x10 => Some(Self::RoomJoined),
            0x11 => Some(Self::ServerSnapshot),
            0x12 => Some(Self::RaceEvent),
            0x13 => Some(Self::PlayerList),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomMsg {
    pub player_name: String,
    pub room_id: String,
    #[serde(default)]
    pub protocol_version: Option<u8>,
    #[serde(default)]
    pub selected_color_id: Option<String>,
    #[serde(default)]
    pub selected_vehicle_id: Option<String>,
}

/// One tick of sequenced control intent. `seq` strictly increases per sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputFrame {
    pub seq: u32,
    pub timestamp_ms: u64,
    /// Latest snapshot seq the client had processed when stamping.
    pub ack_snapshot_seq: Option<u32>,
    pub controls: ControlState,
    pub cruise_control_enabled: bool,
    pub precision_override_active: bool,
    pub protocol_version: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityActivateMsg {
    pub ability_id: String,
    /// Per-client activation counter.
    pub seq: u32,
    pub room_id: String,
    pub target_player_id: Option<PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomMsg {
    pub player_id: PlayerId,
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoinedMsg {
    pub players: Vec<Player>,
    /// Room seed; selects the track.
    pub seed: u64,
    pub local_player_id: Option<PlayerId>,
    pub snapshot: Option<ServerSnapshot>,
    /// Version the server settled on for this connection.
    pub protocol_version: Option<u8>,
}

/// Authoritative world state for one room tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSnapshot {
    /// Monotonic per room.
    pub seq: u32,
    pub server_time_ms: u64,
    pub players: Vec<SnapshotPlayerState>,
    pub hazards: Vec<HazardState>,
    pub powerups: Vec<PowerupState>,
    pub projectiles: Vec<ProjectileState>,
    pub race_state: RaceStateSnapshot,
}

impl ServerSnapshot {
    pub fn player(&self, player_id: PlayerId) -> Option<&SnapshotPlayerState> {
        self.players.iter().find(|p| p.player_id == player_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPlayerState {
    pub player_id: PlayerId,
    pub motion: MotionState,
    /// Highest input seq incorporated into `motion`. `None` until the server
    /// has processed any input from this player.
    pub last_processed_input_seq: Option<u32>,
    pub effects: EffectSet,
    pub progress: RaceProgress,
    #[serde(default)]
    pub abilities: Vec<AbilityLedgerEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardState {
    pub id: u32,
    pub kind: HazardKind,
    pub x: f32,
    pub z: f32,
    pub radius: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerupState {
    pub id: u32,
    pub x: f32,
    pub z: f32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectileState {
    pub id: u32,
    pub ability_id: String,
    pub owner_id: PlayerId,
    pub target_id: Option<PlayerId>,
    pub x: f32,
    pub z: f32,
    pub yaw: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceEventMsg {
    pub kind: RaceEventKind,
    pub room_id: String,
    pub player_id: Option<PlayerId>,
    pub server_time_ms: u64,
    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl RaceEventMsg {
    pub fn new(kind: RaceEventKind, room_id: &str, server_time_ms: u64) -> Self {
        Self {
            kind,
            room_id: room_id.to_string(),
            player_id: None,
            server_time_ms,
            metadata: None,
        }
    }

    pub fn with_player(mut self, player_id: PlayerId) -> Self {
        self.player_id = Some(player_id);
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.as_ref()?.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerListMsg {
    pub players: Vec<Player>,
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    JoinRoom(JoinRoomMsg),
    InputFrame(InputFrame),
    AbilityActivate(AbilityActivateMsg),
    LeaveRoom(LeaveRoomMsg),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    RoomJoined(Box<RoomJoinedMsg>),
    ServerSnapshot(Box<ServerSnapshot>),
    RaceEvent(RaceEventMsg),
    PlayerList(PlayerListMsg),
}
