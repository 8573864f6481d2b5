use std::collections::HashMap;

use glam::Vec3;
use tracing::{debug, info};

use slipstream_core::catalog;
use slipstream_core::collision::{BumpResolver, CarContact};
use slipstream_core::effects::StatusEffectKind;
use slipstream_core::motion::{MotionState, PhysicsConfig};
use slipstream_core::net::messages::{
    ClientMessage, JoinRoomMsg, LeaveRoomMsg, RaceEventMsg, RoomJoinedMsg, ServerMessage,
    ServerSnapshot,
};
use slipstream_core::net::protocol::{INPUT_FRAME_DT, PROTOCOL_VERSION};
use slipstream_core::player::{Player, PlayerId};
use slipstream_core::race::{RaceEventKind, RacePhase, RaceStateMachine, RaceStateSnapshot};

use crate::abilities::AbilityController;
use crate::clock::ServerClock;
use crate::config::ClientConfig;
use crate::correction::CorrectionBlend;
use crate::input::RawControls;
use crate::interpolation::InterpolationBuffer;
use crate::net_client::{ConnectionStatus, Inbox};
use crate::prediction::{PredictionEngine, PredictionPhase, ReconcileOutcome};
use crate::sequencer::InputSequencer;

/// Everything one joined room needs on the client. Created on join and
/// dropped on leave.
///
/// All network input is queued in the [`Inbox`] and applied at the start of
/// [`RaceSession::update`], so the motion state, input history and remote
/// buffers have a single writer per frame.
pub struct RaceSession {
    config: ClientConfig,
    room_id: String,
    status: ConnectionStatus,
    protocol_version: u8,
    local_player_id: Option<PlayerId>,
    players: Vec<Player>,
    seed: u64,
    physics: PhysicsConfig,
    race: RaceStateMachine,
    race_state: RaceStateSnapshot,
    sequencer: InputSequencer,
    prediction: PredictionEngine,
    blend: CorrectionBlend,
    remotes: HashMap<PlayerId, InterpolationBuffer<MotionState>>,
    abilities: AbilityController,
    clock: ServerClock,
    bumps: BumpResolver,
    inbox: Inbox,
    events: Vec<RaceEventMsg>,
}

impl RaceSession {
    pub fn new(config: ClientConfig, room_id: impl Into<String>) -> Self {
        Self {
            sequencer: InputSequencer::new(config.tick_interval(), config.max_catch_up_ticks),
            prediction: PredictionEngine::new(config.prediction_history, config.correction),
            blend: CorrectionBlend::new(config.soft_blend_ms),
            clock: ServerClock::new(config.clock_smoothing),
            room_id: room_id.into(),
            status: ConnectionStatus::Disconnected,
            protocol_version: PROTOCOL_VERSION,
            local_player_id: None,
            players: Vec::new(),
            seed: 0,
            physics: PhysicsConfig::default(),
            race: RaceStateMachine::new(),
            race_state: RaceStateSnapshot::default(),
            remotes: HashMap::new(),
            abilities: AbilityController::new(),
            bumps: BumpResolver::default(),
            inbox: Inbox::new(),
            events: Vec::new(),
            config,
        }
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Handle for the transport to push received frames into.
    pub fn inbox(&self) -> Inbox {
        self.inbox.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn join(
        &mut self,
        player_name: &str,
        color_id: Option<&str>,
        vehicle_id: Option<&str>,
    ) -> ClientMessage {
        self.status = ConnectionStatus::Joining;
        ClientMessage::JoinRoom(JoinRoomMsg {
            player_name: player_name.to_string(),
            room_id: self.room_id.clone(),
            protocol_version: Some(PROTOCOL_VERSION),
            selected_color_id: color_id.map(str::to_string),
            selected_vehicle_id: vehicle_id.map(str::to_string),
        })
    }

    pub fn leave(&mut self) -> Option<ClientMessage> {
        let player_id = self.local_player_id?;
        self.on_disconnect();
        Some(ClientMessage::LeaveRoom(LeaveRoomMsg { player_id }))
    }

    /// Transport lost. The only self-driven race transition: back to idle.
    pub fn on_disconnect(&mut self) {
        if self.status != ConnectionStatus::Disconnected {
            info!(room_id = %self.room_id, "disconnected, race session idle");
        }
        self.status = ConnectionStatus::Disconnected;
        self.race.reset_to_idle();
        self.prediction.reset();
        self.sequencer.pause();
        self.blend.clear();
        self.remotes.clear();
        self.clock.reset();
        self.bumps.clear();
        self.local_player_id = None;
    }

    // ------------------------------------------------------------------
    // Per-frame update
    // ------------------------------------------------------------------

    /// Advance one render frame. Applies queued server messages, then emits
    /// input frames for every network tick due and any ability activations.
    pub fn update(&mut self, frame_dt: f32, local_now_ms: f64, raw: &RawControls) -> Vec<ClientMessage> {
        for msg in self.inbox.drain_decoded() {
            self.handle_server_message(msg, local_now_ms);
        }
        self.blend.update(frame_dt * 1000.0);

        let mut outgoing = Vec::new();
        let Some(local_id) = self.local_player_id else {
            return outgoing;
        };
        if self.status != ConnectionStatus::Connected
            || !self.race.is_running()
            || self.prediction.phase() == PredictionPhase::NoTarget
        {
            self.sequencer.pause();
            return outgoing;
        }

        let server_now = self.clock.server_now_ms(local_now_ms);
        let now_ms = server_now.max(0.0) as u64;
        let dt = INPUT_FRAME_DT.min(self.config.max_step_dt);
        for _ in 0..self.sequencer.poll(frame_dt) {
            let frame = self.sequencer.stamp(
                raw,
                self.prediction.state().speed,
                self.physics.max_forward_speed,
                self.prediction.last_snapshot_seq(),
                now_ms,
            );
            self.prediction
                .apply_local_input(frame.clone(), dt, &self.physics);
            outgoing.push(ClientMessage::InputFrame(frame));
            self.mirror_bumps(local_id, server_now);
        }

        for ability_id in &raw.ability_presses {
            let target = self.nearest_opponent(server_now);
            if let Some(msg) =
                self.abilities
                    .try_activate(ability_id, true, now_ms, &self.room_id, target)
            {
                outgoing.push(ClientMessage::AbilityActivate(msg));
            }
        }
        outgoing
    }

    /// Apply one server message.
    pub fn handle_server_message(&mut self, msg: ServerMessage, local_now_ms: f64) {
        match msg {
            ServerMessage::RoomJoined(joined) => self.on_room_joined(*joined, local_now_ms),
            ServerMessage::ServerSnapshot(snapshot) => self.on_snapshot(&snapshot, local_now_ms),
            ServerMessage::RaceEvent(event) => self.on_race_event(event),
            ServerMessage::PlayerList(list) => self.set_players(list.players),
        }
    }

    fn on_room_joined(&mut self, joined: RoomJoinedMsg, local_now_ms: f64) {
        self.status = ConnectionStatus::Connected;
        self.protocol_version = joined.protocol_version.unwrap_or(PROTOCOL_VERSION);
        self.local_player_id = joined.local_player_id;
        self.seed = joined.seed;
        self.set_players(joined.players);
        info!(
            room_id = %self.room_id,
            player_id = ?self.local_player_id,
            protocol_version = self.protocol_version,
            "joined room"
        );
        if let Some(snapshot) = joined.snapshot {
            self.race
                .sync(snapshot.race_state.phase, snapshot.server_time_ms);
            self.on_snapshot(&snapshot, local_now_ms);
        }
    }

    fn set_players(&mut self, players: Vec<Player>) {
        self.remotes
            .retain(|id, _| players.iter().any(|p| p.id == *id));
        if let Some(me) = self
            .local_player_id
            .and_then(|id| players.iter().find(|p| p.id == id))
        {
            self.physics = catalog::vehicle_or_default(&me.vehicle_id).physics;
        }
        self.players = players;
    }

    fn on_snapshot(&mut self, snapshot: &ServerSnapshot, local_now_ms: f64) {
        let Some(local_id) = self.local_player_id else {
            return;
        };
        let outcome = self.prediction.reconcile(
            snapshot,
            local_id,
            &self.physics,
            self.sequencer.last_seq(),
        );
        if outcome == ReconcileOutcome::Stale {
            return;
        }
        if let ReconcileOutcome::Reconciled(correction) = outcome {
            self.blend.on_correction(&correction);
        }

        self.clock.observe(snapshot.server_time_ms, local_now_ms);
        let server_now = self.clock.server_now_ms(local_now_ms);
        self.race_state = snapshot.race_state;

        if let Some(me) = snapshot.player(local_id) {
            self.abilities
                .apply_ledger(&me.abilities, server_now.max(0.0) as u64);
        }
        for player in snapshot.players.iter().filter(|p| p.player_id != local_id) {
            let buffer = self.remotes.entry(player.player_id).or_insert_with(|| {
                InterpolationBuffer::new(
                    self.config.interpolation_retention_ms,
                    self.config.interpolation_capacity,
                )
            });
            buffer.push(snapshot.server_time_ms as f64, player.motion);
            buffer.prune(server_now);
        }
    }

    fn on_race_event(&mut self, event: RaceEventMsg) {
        if let Some((from, to)) = self.race.apply(event.kind, event.server_time_ms) {
            info!(room_id = %self.room_id, ?from, ?to, "race phase changed");
            if event.kind == RaceEventKind::RaceStarted {
                self.abilities.reset();
                self.bumps.clear();
            }
        }
        self.events.push(event);
    }

    /// Predict drive-recovery locks from contact with interpolated
    /// opponents. Stuns and flips are left to the server.
    fn mirror_bumps(&mut self, local_id: PlayerId, server_now: f64) {
        let local = CarContact {
            player_id: local_id,
            state: *self.prediction.state(),
        };
        let render_ms = server_now - self.config.interpolation_delay_ms;
        let opponents: Vec<CarContact> = self
            .remotes
            .iter()
            .filter_map(|(&player_id, buffer)| {
                buffer
                    .sample_at(render_ms)
                    .map(|state| CarContact { player_id, state })
            })
            .collect();
        let now_ms = server_now.max(0.0) as u64;
        for opponent in &opponents {
            let Some(outcome) = self.bumps.resolve(now_ms, &local, opponent) else {
                continue;
            };
            debug!(rammer = outcome.rammer, bumped = outcome.bumped, "predicted bump");
            for (kind, duration_ms) in outcome.effects_for(local_id) {
                if kind == StatusEffectKind::DriveRecoveryLock {
                    self.prediction.effects_mut().apply(kind, duration_ms);
                }
            }
        }
    }

    fn nearest_opponent(&self, server_now: f64) -> Option<PlayerId> {
        let me = self.prediction.state();
        let render_ms = server_now - self.config.interpolation_delay_ms;
        self.remotes
            .iter()
            .filter_map(|(&id, buffer)| Some((id, me.distance_to(&buffer.sample_at(render_ms)?))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    // ------------------------------------------------------------------
    // Render-facing queries
    // ------------------------------------------------------------------

    pub fn phase(&self) -> RacePhase {
        self.race.phase()
    }

    pub fn race_state(&self) -> &RaceStateSnapshot {
        &self.race_state
    }

    pub fn local_player_id(&self) -> Option<PlayerId> {
        self.local_player_id
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn prediction(&self) -> &PredictionEngine {
        &self.prediction
    }

    pub fn abilities(&self) -> &AbilityController {
        &self.abilities
    }

    /// Where to draw the local car: prediction plus any soft-correction
    /// offset still blending out.
    pub fn local_render_position(&self) -> Vec3 {
        Vec3::from(self.prediction.state().position()) + self.blend.offset()
    }

    /// Interpolated pose of a remote car, rendered `interpolation_delay_ms`
    /// behind the server clock. `None` until it has a sample.
    pub fn remote_pose(&self, player_id: PlayerId, local_now_ms: f64) -> Option<MotionState> {
        let render_ms = self.clock.server_now_ms(local_now_ms) - self.config.interpolation_delay_ms;
        self.remotes.get(&player_id)?.sample_at(render_ms)
    }

    /// Race events received since the last call, for HUD/audio.
    pub fn drain_events(&mut self) -> Vec<RaceEventMsg> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipstream_core::net::messages::{PlayerListMsg, SnapshotPlayerState};
    use slipstream_core::net::protocol::encode_server_message;
    use slipstream_core::test_helpers::{make_player_state, make_players, snapshot_with};

    const ME: PlayerId = 1;
    const RIVAL: PlayerId = 2;

    fn joined_session() -> RaceSession {
        let mut session = RaceSession::new(ClientConfig::default(), "dock");
        session.join("Racer1", None, None);
        let mut snapshot = snapshot_with(
            1,
            1000,
            vec![
                make_player_state(ME, MotionState::at(0.0, 0.0, 0.0, 0.0), None),
                make_player_state(RIVAL, MotionState::at(30.0, 0.0, 0.0, 0.0), None),
            ],
        );
        snapshot.race_state.phase = RacePhase::Countdown;
        session.handle_server_message(
            ServerMessage::RoomJoined(Box::new(RoomJoinedMsg {
                players: make_players(2),
                seed: 0,
                local_player_id: Some(ME),
                snapshot: Some(snapshot),
                protocol_version: Some(PROTOCOL_VERSION),
            })),
            1000.0,
        );
        session
    }

    fn event(kind: RaceEventKind, server_time_ms: u64) -> ServerMessage {
        ServerMessage::RaceEvent(RaceEventMsg::new(kind, "dock", server_time_ms))
    }

    fn throttle() -> RawControls {
        RawControls {
            up: true,
            cruise_enabled: true,
            ..RawControls::default()
        }
    }

    impl RaceSession {
        fn blend_offset_len(&self) -> f32 {
            self.blend.offset().length()
        }
    }

    fn input_frames(messages: &[ClientMessage]) -> Vec<u32> {
        messages
            .iter()
            .filter_map(|m| match m {
                ClientMessage::InputFrame(f) => Some(f.seq),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn no_input_before_race_starts() {
        let mut session = joined_session();
        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert_eq!(session.phase(), RacePhase::Countdown);
        let out = session.update(0.1, 1100.0, &throttle());
        assert!(out.is_empty());
        assert_eq!(*session.prediction().state(), MotionState::default());
    }

    #[test]
    fn running_race_emits_sequenced_frames() {
        let mut session = joined_session();
        session.handle_server_message(event(RaceEventKind::RaceStarted, 3000), 3000.0);
        assert_eq!(session.phase(), RacePhase::Running);

        let first = session.update(0.05, 3050.0, &throttle());
        let second = session.update(0.05, 3100.0, &throttle());
        assert_eq!(input_frames(&first), vec![1]);
        assert_eq!(input_frames(&second), vec![2]);
        assert!(session.prediction().state().z > 0.0);
    }

    #[test]
    fn wire_messages_are_applied_at_update() {
        let mut session = joined_session();
        let bytes = encode_server_message(&event(RaceEventKind::RaceStarted, 3000)).expect("encode");
        session.inbox().push(bytes);
        session.inbox().push(vec![0xff]);
        assert_eq!(session.phase(), RacePhase::Countdown);
        session.update(0.0, 3000.0, &RawControls::default());
        assert_eq!(session.phase(), RacePhase::Running);
        assert_eq!(session.drain_events().len(), 1);
    }

    #[test]
    fn disconnect_forces_idle() {
        let mut session = joined_session();
        session.handle_server_message(event(RaceEventKind::RaceStarted, 3000), 3000.0);
        session.on_disconnect();
        assert_eq!(session.phase(), RacePhase::Idle);
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(session.update(0.1, 3200.0, &throttle()).is_empty());
    }

    #[test]
    fn remote_cars_interpolate_behind_server_time() {
        let mut session = joined_session();
        let remote = |x: f32| make_player_state(RIVAL, MotionState::at(x, 0.0, 0.0, 0.0), None);
        let me = || make_player_state(ME, MotionState::default(), None);
        for (seq, t, x) in [(2u32, 1050u64, 32.0f32), (3, 1100, 34.0)] {
            session.handle_server_message(
                ServerMessage::ServerSnapshot(Box::new(snapshot_with(seq, t, vec![me(), remote(x)]))),
                t as f64,
            );
        }
        // Render time lags the estimated server clock by the interpolation delay.
        let pose = session.remote_pose(RIVAL, 1175.0).expect("visible");
        assert!(pose.x > 30.0 && pose.x < 34.0, "x {}", pose.x);
        assert!(session.remote_pose(99, 1175.0).is_none());
    }

    #[test]
    fn departed_player_buffer_is_dropped() {
        let mut session = joined_session();
        assert!(session.remote_pose(RIVAL, 1000.0).is_some());
        session.handle_server_message(
            ServerMessage::PlayerList(PlayerListMsg {
                players: make_players(1),
            }),
            1100.0,
        );
        assert!(session.remote_pose(RIVAL, 1100.0).is_none());
    }

    #[test]
    fn ability_press_targets_nearest_opponent() {
        let mut session = joined_session();
        session.handle_server_message(event(RaceEventKind::RaceStarted, 3000), 3000.0);
        let raw = RawControls {
            ability_presses: vec!["shock_pulse".to_string()],
            ..RawControls::default()
        };
        let out = session.update(0.0, 3000.0, &raw);
        let activation = out.iter().find_map(|m| match m {
            ClientMessage::AbilityActivate(a) => Some(a.clone()),
            _ => None,
        });
        let activation = activation.expect("activation emitted");
        assert_eq!(activation.target_player_id, Some(RIVAL));
        assert_eq!(activation.seq, 1);
    }

    #[test]
    fn repeated_ack_keeps_soft_blend() {
        let mut session = joined_session();
        session.handle_server_message(event(RaceEventKind::RaceStarted, 3000), 3000.0);
        for i in 1..=3u32 {
            session.update(0.05, 3000.0 + 50.0 * f64::from(i), &throttle());
        }
        let mut nudged = session.prediction().predicted_at(2).expect("recorded");
        nudged.x += 0.5;
        let snap = |seq: u32| {
            ServerMessage::ServerSnapshot(Box::new(snapshot_with(
                seq,
                3200,
                vec![make_player_state(ME, nudged, Some(2))],
            )))
        };

        session.handle_server_message(snap(2), 3200.0);
        let drawn = session.local_render_position();
        assert!(session.blend_offset_len() > 0.1);

        // No new input reached the server, same ack again.
        session.handle_server_message(snap(3), 3250.0);
        assert_eq!(session.local_render_position(), drawn);
    }

    #[test]
    fn stale_snapshot_does_not_touch_remotes() {
        let mut session = joined_session();
        let snap = |seq: u32, t: u64, x: f32| {
            let players: Vec<SnapshotPlayerState> = vec![
                make_player_state(ME, MotionState::default(), None),
                make_player_state(RIVAL, MotionState::at(x, 0.0, 0.0, 0.0), None),
            ];
            ServerMessage::ServerSnapshot(Box::new(snapshot_with(seq, t, players)))
        };
        session.handle_server_message(snap(5, 1250, 40.0), 1250.0);
        session.handle_server_message(snap(4, 1200, -500.0), 1260.0);
        let pose = session.remote_pose(RIVAL, 5000.0).expect("visible");
        assert_eq!(pose.x, 40.0);
    }
}
