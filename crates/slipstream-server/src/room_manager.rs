use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use slipstream_core::catalog;
use slipstream_core::collision::BumpConfig;
use slipstream_core::net::messages::{
    JoinRoomMsg, PlayerListMsg, RoomJoinedMsg, ServerMessage,
};
use slipstream_core::net::protocol::encode_server_message;
use slipstream_core::player::{Player, PlayerColor, PlayerId};

use crate::config::RoomsConfig;
use crate::game_loop::{GameBroadcast, GameCommand, RoomSessionConfig, spawn_room_session};

/// Per-player sender for outbound WebSocket binary messages.
/// Bounded so a slow client cannot exhaust memory; uses `Bytes` for
/// zero-copy cloning when broadcasting to multiple players.
pub type PlayerSender = mpsc::Sender<Bytes>;

type SharedSenders = Arc<Mutex<HashMap<PlayerId, PlayerSender>>>;

const MAX_NAME_LEN: usize = 32;
const MAX_ROOM_ID_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("invalid player name")]
    InvalidName,
    #[error("invalid room id")]
    InvalidRoomId,
    #[error("room is full")]
    RoomFull,
    #[error("room session is gone")]
    SessionGone,
}

/// Everything the socket handler needs after a successful join.
pub struct JoinTicket {
    pub player: Player,
    /// Resolves to the `RoomJoined` payload from the room's tick loop.
    pub joined: oneshot::Receiver<RoomJoinedMsg>,
}

/// Manages all active rooms and their connected players.
pub struct RoomManager {
    rooms: HashMap<String, RoomEntry>,
    next_player_id: PlayerId,
    rooms_config: RoomsConfig,
    bump_config: BumpConfig,
}

struct RoomEntry {
    players: Vec<Player>,
    /// Outbound channels, shared with the broadcast forwarder.
    senders: SharedSenders,
    command_tx: mpsc::UnboundedSender<GameCommand>,
    _game_task: JoinHandle<()>,
    _broadcast_task: JoinHandle<()>,
}

impl RoomManager {
    pub fn new(rooms_config: RoomsConfig, bump_config: BumpConfig) -> Self {
        Self {
            rooms: HashMap::new(),
            next_player_id: 1,
            rooms_config,
            bump_config,
        }
    }

    fn alloc_player_id(&mut self) -> PlayerId {
        let id = self.next_player_id;
        self.next_player_id += 1;
        id
    }

    /// Join `join.room_id`, creating the room and its tick loop if this is
    /// the first player.
    pub fn join(
        &mut self,
        join: &JoinRoomMsg,
        protocol_version: u8,
        sender: PlayerSender,
    ) -> Result<JoinTicket, JoinError> {
        let name = join.player_name.trim();
        if name.is_empty()
            || name.chars().count() > MAX_NAME_LEN
            || name.chars().any(char::is_control)
        {
            return Err(JoinError::InvalidName);
        }
        if !is_valid_room_id(&join.room_id) {
            return Err(JoinError::InvalidRoomId);
        }
        if self
            .rooms
            .get(&join.room_id)
            .is_some_and(|entry| entry.players.len() >= self.rooms_config.max_players)
        {
            return Err(JoinError::RoomFull);
        }

        let player_id = self.alloc_player_id();
        if !self.rooms.contains_key(&join.room_id) {
            let entry = self.spawn_room(&join.room_id);
            self.rooms.insert(join.room_id.clone(), entry);
        }
        let Some(entry) = self.rooms.get_mut(&join.room_id) else {
            return Err(JoinError::SessionGone);
        };

        let color = PlayerColor::resolve(join.selected_color_id.as_deref(), entry.players.len());
        let vehicle_id = join
            .selected_vehicle_id
            .as_deref()
            .and_then(catalog::vehicle)
            .map_or(catalog::DEFAULT_VEHICLE_ID, |v| v.id);
        let player = Player {
            id: player_id,
            name: name.to_string(),
            color_id: color.id.to_string(),
            vehicle_id: vehicle_id.to_string(),
        };

        let (reply, joined) = oneshot::channel();
        entry
            .command_tx
            .send(GameCommand::PlayerJoined {
                player: player.clone(),
                protocol_version,
                reply,
            })
            .map_err(|_| JoinError::SessionGone)?;
        entry.players.push(player.clone());
        entry
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(player_id, sender);

        tracing::info!(
            player_id,
            room = %join.room_id,
            players = entry.players.len(),
            "Player joined"
        );
        Ok(JoinTicket { player, joined })
    }

    fn spawn_room(&self, room_id: &str) -> RoomEntry {
        let seed = rand::random::<u64>();
        let (command_tx, broadcast_rx, game_task) = spawn_room_session(RoomSessionConfig {
            room_id: room_id.to_string(),
            seed,
            rooms: self.rooms_config.clone(),
            bump: self.bump_config.clone(),
        });
        let senders: SharedSenders = Arc::new(Mutex::new(HashMap::new()));
        let broadcast_task = tokio::spawn(forward_broadcasts(
            broadcast_rx,
            Arc::clone(&senders),
            room_id.to_string(),
        ));
        tracing::info!(room = room_id, seed, "Room created");
        RoomEntry {
            players: Vec::new(),
            senders,
            command_tx,
            _game_task: game_task,
            _broadcast_task: broadcast_task,
        }
    }

    /// Remove a player. Returns true if the room was destroyed (empty after leave).
    pub fn leave(&mut self, room_id: &str, player_id: PlayerId) -> bool {
        let Some(entry) = self.rooms.get_mut(room_id) else {
            return false;
        };
        if !entry.players.iter().any(|p| p.id == player_id) {
            return false;
        }
        entry.players.retain(|p| p.id != player_id);
        entry
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&player_id);
        if let Err(e) = entry.command_tx.send(GameCommand::PlayerLeft { player_id }) {
            tracing::debug!(player_id, room = room_id, error = %e, "Room session gone");
        }
        tracing::info!(player_id, room = room_id, "Player left");

        if entry.players.is_empty() {
            if let Err(e) = entry.command_tx.send(GameCommand::Stop) {
                tracing::debug!(room = room_id, error = %e, "Room session already stopped");
            }
            self.rooms.remove(room_id);
            tracing::info!(room = room_id, "Room closed");
            return true;
        }
        false
    }

    /// Forward a command to the room's tick loop.
    pub fn route(&self, room_id: &str, cmd: GameCommand) {
        if let Some(entry) = self.rooms.get(room_id)
            && let Err(e) = entry.command_tx.send(cmd)
        {
            tracing::debug!(room = room_id, error = %e, "Room session gone");
        }
    }

    /// Build and broadcast a PlayerList update to everyone in the room.
    pub fn broadcast_player_list(&self, room_id: &str) {
        let Some(entry) = self.rooms.get(room_id) else {
            return;
        };
        let msg = ServerMessage::PlayerList(PlayerListMsg {
            players: entry.players.clone(),
        });
        match encode_server_message(&msg) {
            Ok(data) => {
                let bytes = Bytes::from(data);
                let senders = entry.senders.lock().unwrap_or_else(PoisonError::into_inner);
                for (&pid, sender) in senders.iter() {
                    if let Err(e) = sender.try_send(bytes.clone()) {
                        tracing::debug!(
                            player_id = pid, room = room_id, error = %e,
                            "Skipping player list broadcast to slow client"
                        );
                    }
                }
            },
            Err(e) => tracing::error!(room = room_id, error = %e, "Failed to encode PlayerList"),
        }
    }

    pub fn players(&self, room_id: &str) -> Option<&[Player]> {
        self.rooms.get(room_id).map(|e| e.players.as_slice())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn player_count(&self) -> usize {
        self.rooms.values().map(|e| e.players.len()).sum()
    }

    /// Stop every room session (server shutdown).
    pub fn shutdown(&mut self) {
        for (room_id, entry) in self.rooms.drain() {
            if let Err(e) = entry.command_tx.send(GameCommand::Stop) {
                tracing::debug!(room = %room_id, error = %e, "Room session already stopped");
            }
        }
    }
}

/// Room ids are client-chosen: 1-32 ASCII letters, digits, `-` or `_`.
pub fn is_valid_room_id(room_id: &str) -> bool {
    !room_id.is_empty()
        && room_id.len() <= MAX_ROOM_ID_LEN
        && room_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Forward tick loop broadcasts to all connected players in a room.
async fn forward_broadcasts(
    mut broadcast_rx: mpsc::UnboundedReceiver<GameBroadcast>,
    senders: SharedSenders,
    room_id: String,
) {
    while let Some(broadcast) = broadcast_rx.recv().await {
        match broadcast {
            GameBroadcast::EncodedMessage(data) => {
                let targets: Vec<(PlayerId, PlayerSender)> = senders
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .map(|(&id, tx)| (id, tx.clone()))
                    .collect();
                for (player_id, sender) in targets {
                    if let Err(e) = sender.try_send(data.clone()) {
                        tracing::debug!(
                            player_id, room = %room_id, error = %e,
                            "Skipping broadcast to slow client"
                        );
                    }
                }
            },
            GameBroadcast::Ended => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max_players: usize) -> RoomManager {
        RoomManager::new(
            RoomsConfig {
                max_players,
                lobby_wait_ms: 60_000,
                ..RoomsConfig::default()
            },
            BumpConfig::default(),
        )
    }

    fn join_msg(name: &str, room: &str) -> JoinRoomMsg {
        JoinRoomMsg {
            player_name: name.to_string(),
            room_id: room.to_string(),
            protocol_version: None,
            selected_color_id: None,
            selected_vehicle_id: None,
        }
    }

    fn sender() -> (PlayerSender, mpsc::Receiver<Bytes>) {
        mpsc::channel(16)
    }

    #[tokio::test]
    async fn first_join_creates_room() {
        let mut mgr = manager(8);
        let (tx, _rx) = sender();
        let ticket = mgr.join(&join_msg("Ada", "dock"), 2, tx).unwrap();
        assert_eq!(ticket.player.id, 1);
        assert_eq!(ticket.player.vehicle_id, catalog::DEFAULT_VEHICLE_ID);
        assert_eq!(mgr.room_count(), 1);

        let joined = ticket.joined.await.unwrap();
        assert_eq!(joined.local_player_id, Some(1));
    }

    #[tokio::test]
    async fn second_join_shares_the_room() {
        let mut mgr = manager(8);
        let (tx1, _rx1) = sender();
        let (tx2, _rx2) = sender();
        mgr.join(&join_msg("Ada", "dock"), 2, tx1).unwrap();
        let mut msg = join_msg("Bo", "dock");
        msg.selected_color_id = Some("teal".to_string());
        msg.selected_vehicle_id = Some("sprinter".to_string());
        let ticket = mgr.join(&msg, 2, tx2).unwrap();
        assert_eq!(ticket.player.id, 2);
        assert_eq!(ticket.player.color_id, "teal");
        assert_eq!(ticket.player.vehicle_id, "sprinter");
        assert_eq!(mgr.room_count(), 1);
        assert_eq!(mgr.player_count(), 2);

        let joined = ticket.joined.await.unwrap();
        assert_eq!(joined.players.len(), 2);
    }

    #[tokio::test]
    async fn unknown_vehicle_falls_back_to_default() {
        let mut mgr = manager(8);
        let (tx, _rx) = sender();
        let mut msg = join_msg("Ada", "dock");
        msg.selected_vehicle_id = Some("hovercraft".to_string());
        let ticket = mgr.join(&msg, 2, tx).unwrap();
        assert_eq!(ticket.player.vehicle_id, catalog::DEFAULT_VEHICLE_ID);
    }

    #[tokio::test]
    async fn full_room_rejects() {
        let mut mgr = manager(1);
        let (tx1, _rx1) = sender();
        let (tx2, _rx2) = sender();
        mgr.join(&join_msg("Ada", "dock"), 2, tx1).unwrap();
        assert_eq!(
            mgr.join(&join_msg("Bo", "dock"), 2, tx2).err(),
            Some(JoinError::RoomFull)
        );
    }

    #[tokio::test]
    async fn invalid_names_and_rooms_reject() {
        let mut mgr = manager(8);
        let (tx, _rx) = sender();
        assert_eq!(
            mgr.join(&join_msg("   ", "dock"), 2, tx.clone()).err(),
            Some(JoinError::InvalidName)
        );
        assert_eq!(
            mgr.join(&join_msg("Ada", "no spaces"), 2, tx).err(),
            Some(JoinError::InvalidRoomId)
        );
        assert_eq!(mgr.room_count(), 0);
    }

    #[tokio::test]
    async fn last_leave_closes_room() {
        let mut mgr = manager(8);
        let (tx1, _rx1) = sender();
        let (tx2, _rx2) = sender();
        mgr.join(&join_msg("Ada", "dock"), 2, tx1).unwrap();
        mgr.join(&join_msg("Bo", "dock"), 2, tx2).unwrap();
        assert!(!mgr.leave("dock", 1));
        assert_eq!(mgr.players("dock").map(<[Player]>::len), Some(1));
        assert!(!mgr.leave("dock", 1));
        assert!(mgr.leave("dock", 2));
        assert_eq!(mgr.room_count(), 0);
    }

    #[tokio::test]
    async fn player_list_reaches_everyone() {
        let mut mgr = manager(8);
        let (tx1, mut rx1) = sender();
        let (tx2, mut rx2) = sender();
        mgr.join(&join_msg("Ada", "dock"), 2, tx1).unwrap();
        mgr.join(&join_msg("Bo", "dock"), 2, tx2).unwrap();
        mgr.broadcast_player_list("dock");

        for rx in [&mut rx1, &mut rx2] {
            let found = std::iter::from_fn(|| rx.try_recv().ok()).any(|data| {
                matches!(
                    slipstream_core::net::protocol::decode_server_message(&data),
                    Ok(ServerMessage::PlayerList(list)) if list.players.len() == 2
                )
            });
            assert!(found);
        }
    }

    #[test]
    fn room_id_rules() {
        assert!(is_valid_room_id("dock-7_b"));
        assert!(!is_valid_room_id(""));
        assert!(!is_valid_room_id("a/b"));
        assert!(!is_valid_room_id(&"x".repeat(33)));
    }
}
