pub mod ability;
pub mod catalog;
pub mod collision;
pub mod effects;
pub mod motion;
pub mod net;
pub mod player;
pub mod race;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::effects::EffectSet;
    use crate::motion::{ControlState, MotionState};
    use crate::net::messages::{InputFrame, ServerSnapshot, SnapshotPlayerState};
    use crate::net::protocol::PROTOCOL_VERSION;
    use crate::player::{Player, PlayerColor, PlayerId};
    use crate::race::{RacePhase, RaceProgress, RaceStateSnapshot};

    /// Create `n` test players with sequential IDs starting at 1.
    pub fn make_players(n: usize) -> Vec<Player> {
        (0..n)
            .map(|i| Player {
                id: i as PlayerId + 1,
                name: format!("Racer{}", i + 1),
                color_id: PlayerColor::resolve(None, i).id.to_string(),
                vehicle_id: "balanced".to_string(),
            })
            .collect()
    }

    /// Controls for straight-line full throttle.
    pub fn full_throttle() -> ControlState {
        ControlState {
            throttle: 1,
            ..ControlState::default()
        }
    }

    /// An input frame stamped 50ms per sequence step.
    pub fn make_input_frame(seq: u32, ack: Option<u32>, controls: ControlState) -> InputFrame {
        InputFrame {
            seq,
            timestamp_ms: u64::from(seq) * 50,
            ack_snapshot_seq: ack,
            controls,
            cruise_control_enabled: controls.cruise_control,
            precision_override_active: controls.handbrake,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    pub fn make_player_state(
        player_id: PlayerId,
        motion: MotionState,
        last_processed_input_seq: Option<u32>,
    ) -> SnapshotPlayerState {
        SnapshotPlayerState {
            player_id,
            motion,
            last_processed_input_seq,
            effects: EffectSet::default(),
            progress: RaceProgress::default(),
            abilities: Vec::new(),
        }
    }

    /// A running-race snapshot with players parked at the origin.
    pub fn make_snapshot(
        seq: u32,
        server_time_ms: u64,
        players: &[(PlayerId, Option<u32>)],
    ) -> ServerSnapshot {
        snapshot_with(
            seq,
            server_time_ms,
            players
                .iter()
                .map(|&(id, last)| make_player_state(id, MotionState::default(), last))
                .collect(),
        )
    }

    pub fn snapshot_with(
        seq: u32,
        server_time_ms: u64,
        players: Vec<SnapshotPlayerState>,
    ) -> ServerSnapshot {
        ServerSnapshot {
            seq,
            server_time_ms,
            players,
            hazards: Vec::new(),
            powerups: Vec::new(),
            projectiles: Vec::new(),
            race_state: RaceStateSnapshot {
                phase: RacePhase::Running,
                countdown_remaining_ms: 0,
                lap_count: 3,
                elapsed_ms: server_time_ms,
            },
        }
    }
}
