use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use slipstream_core::collision::BumpConfig;
use slipstream_core::net::messages::{
    AbilityActivateMsg, InputFrame, RoomJoinedMsg, ServerMessage, ServerSnapshot,
};
use slipstream_core::net::protocol::encode_server_message;
use slipstream_core::player::{Player, PlayerId};
use slipstream_core::time::now_ms;

use crate::config::RoomsConfig;
use crate::simulation::RoomSimulation;

/// Commands sent from the WebSocket handlers to a room's tick loop.
#[derive(Debug)]
pub enum GameCommand {
    PlayerJoined {
        player: Player,
        protocol_version: u8,
        /// Receives the `RoomJoined` payload once the racer is on the grid.
        reply: oneshot::Sender<RoomJoinedMsg>,
    },
    Input {
        player_id: PlayerId,
        frame: InputFrame,
    },
    Ability {
        player_id: PlayerId,
        msg: AbilityActivateMsg,
    },
    PlayerLeft {
        player_id: PlayerId,
    },
    Stop,
}

/// Broadcasts sent from the tick loop to everyone in the room.
#[derive(Debug, Clone)]
pub enum GameBroadcast {
    /// Serialized `ServerMessage` bytes ready to send over WebSocket.
    /// Uses `Bytes` for zero-copy cloning across player channels.
    EncodedMessage(Bytes),
    /// The loop has exited.
    Ended,
}

/// Settings for one room's tick loop.
pub struct RoomSessionConfig {
    pub room_id: String,
    pub seed: u64,
    pub rooms: RoomsConfig,
    pub bump: BumpConfig,
}

/// Spawn a room tick loop as a tokio task.
/// Returns the command sender, broadcast receiver and task handle.
pub fn spawn_room_session(
    config: RoomSessionConfig,
) -> (
    mpsc::UnboundedSender<GameCommand>,
    mpsc::UnboundedReceiver<GameBroadcast>,
    JoinHandle<()>,
) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_room_tick_loop(config, cmd_rx, broadcast_tx));
    (cmd_tx, broadcast_rx, handle)
}

fn send_encoded(broadcast_tx: &mpsc::UnboundedSender<GameBroadcast>, msg: &ServerMessage) {
    match encode_server_message(msg) {
        Ok(data) => {
            let _ = broadcast_tx.send(GameBroadcast::EncodedMessage(Bytes::from(data)));
        },
        Err(e) => tracing::error!(error = %e, "Failed to encode server message"),
    }
}

/// The server-authoritative tick loop for one room.
async fn run_room_tick_loop(
    config: RoomSessionConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<GameCommand>,
    broadcast_tx: mpsc::UnboundedSender<GameBroadcast>,
) {
    let room_id = config.room_id.clone();
    let tick_interval = Duration::from_secs_f64(1.0 / f64::from(config.rooms.tick_rate_hz.max(1)));
    let mut sim = RoomSimulation::new(&config.room_id, config.seed, config.rooms, config.bump);
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        room = %room_id,
        seed = config.seed,
        track = sim.track().id,
        "Room session started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let out = sim.tick(now_ms());
                for event in out.events {
                    send_encoded(&broadcast_tx, &ServerMessage::RaceEvent(event));
                }
                send_encoded(
                    &broadcast_tx,
                    &ServerMessage::ServerSnapshot(Box::new(out.snapshot)),
                );
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(GameCommand::PlayerJoined { player, protocol_version, reply }) => {
                        let player_id = player.id;
                        sim.add_player(player);
                        let joined = room_joined(&sim, player_id, protocol_version, sim.snapshot(now_ms()));
                        if reply.send(joined).is_err() {
                            tracing::debug!(player_id, room = %room_id, "Joiner went away");
                        }
                    },
                    Some(GameCommand::Input { player_id, frame }) => {
                        sim.queue_input(player_id, frame);
                    },
                    Some(GameCommand::Ability { player_id, msg }) => {
                        for event in sim.activate_ability(player_id, &msg, now_ms()) {
                            send_encoded(&broadcast_tx, &ServerMessage::RaceEvent(event));
                        }
                    },
                    Some(GameCommand::PlayerLeft { player_id }) => {
                        sim.remove_player(player_id);
                    },
                    Some(GameCommand::Stop) | None => break,
                }
            }
        }
    }

    tracing::info!(room = %room_id, "Room session stopped");
    let _ = broadcast_tx.send(GameBroadcast::Ended);
}

fn room_joined(
    sim: &RoomSimulation,
    player_id: PlayerId,
    protocol_version: u8,
    snapshot: ServerSnapshot,
) -> RoomJoinedMsg {
    RoomJoinedMsg {
        players: sim.players(),
        seed: sim.seed(),
        local_player_id: Some(player_id),
        snapshot: Some(snapshot),
        protocol_version: Some(protocol_version),
    }
}
