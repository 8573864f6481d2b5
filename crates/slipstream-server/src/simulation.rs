use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, info};

use slipstream_core::ability::{AbilityDelivery, AbilityManifest, AbilityRuntimeState, AbilityTarget};
use slipstream_core::catalog::{self, TrackManifest};
use slipstream_core::collision::{BumpConfig, BumpResolver, CarContact};
use slipstream_core::effects::EffectSet;
use slipstream_core::motion::{self, MotionState, PhysicsConfig, shortest_angle_delta, wrap_angle};
use slipstream_core::net::messages::{
    AbilityActivateMsg, HazardState, InputFrame, PowerupState, ProjectileState, RaceEventMsg,
    ServerSnapshot, SnapshotPlayerState,
};
use slipstream_core::net::protocol::INPUT_FRAME_DT;
use slipstream_core::player::{Player, PlayerId};
use slipstream_core::race::{RaceEventKind, RacePhase, RaceProgress, RaceStateSnapshot};

use crate::config::RoomsConfig;

/// Max turn rate of a homing projectile, rad/s.
const HOMING_TURN_RATE: f32 = 4.0;
/// Distance ahead of the owner a projectile spawns at.
const PROJECTILE_SPAWN_OFFSET: f32 = 3.0;
/// Longest gap between two ticks that projectiles integrate over.
const MAX_TICK_GAP_MS: u64 = 250;

/// One racer as the server sees it.
struct Racer {
    player: Player,
    physics: PhysicsConfig,
    grid_slot: usize,
    motion: MotionState,
    effects: EffectSet,
    progress: RaceProgress,
    abilities: AbilityRuntimeState,
    queue: VecDeque<InputFrame>,
    last_processed_input_seq: Option<u32>,
}

impl Racer {
    fn snapshot(&self) -> SnapshotPlayerState {
        SnapshotPlayerState {
            player_id: self.player.id,
            motion: self.motion,
            last_processed_input_seq: self.last_processed_input_seq,
            effects: self.effects.clone(),
            progress: self.progress,
            abilities: self.abilities.ledger(),
        }
    }

    fn is_finished(&self) -> bool {
        self.progress.finished_at_ms.is_some()
    }
}

struct Projectile {
    id: u32,
    manifest: &'static AbilityManifest,
    owner_id: PlayerId,
    target_id: Option<PlayerId>,
    x: f32,
    z: f32,
    yaw: f32,
    remaining_ms: f32,
}

/// Output of one simulation tick.
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub snapshot: ServerSnapshot,
    pub events: Vec<RaceEventMsg>,
}

/// Authoritative state of one room.
///
/// Owned by exactly one tick loop. Inputs queue per player and are consumed
/// on the next tick, one motion step of [`INPUT_FRAME_DT`] per frame, so the
/// server reproduces each client's prediction step for step.
pub struct RoomSimulation {
    room_id: String,
    seed: u64,
    track: &'static TrackManifest,
    config: RoomsConfig,
    racers: BTreeMap<PlayerId, Racer>,
    bumps: BumpResolver,
    projectiles: Vec<Projectile>,
    next_projectile_id: u32,
    pad_ready_at_ms: Vec<u64>,
    phase: RacePhase,
    lobby_ready_at_ms: Option<u64>,
    countdown_ends_ms: u64,
    race_started_ms: u64,
    first_finish_ms: Option<u64>,
    race_finished_ms: u64,
    finishers: u32,
    snapshot_seq: u32,
    last_tick_ms: Option<u64>,
}

impl RoomSimulation {
    pub fn new(room_id: &str, seed: u64, config: RoomsConfig, bump: BumpConfig) -> Self {
        let track = catalog::track_for_seed(seed);
        Self {
            room_id: room_id.to_string(),
            seed,
            track,
            config,
            racers: BTreeMap::new(),
            bumps: BumpResolver::new(bump),
            projectiles: Vec::new(),
            next_projectile_id: 1,
            pad_ready_at_ms: vec![0; track.powerup_pads.len()],
            phase: RacePhase::Idle,
            lobby_ready_at_ms: None,
            countdown_ends_ms: 0,
            race_started_ms: 0,
            first_finish_ms: None,
            race_finished_ms: 0,
            finishers: 0,
            snapshot_seq: 0,
            last_tick_ms: None,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn track(&self) -> &'static TrackManifest {
        self.track
    }

    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    pub fn lap_count(&self) -> u32 {
        self.config.lap_count.unwrap_or(self.track.lap_count)
    }

    pub fn player_count(&self) -> usize {
        self.racers.len()
    }

    pub fn players(&self) -> Vec<Player> {
        self.racers.values().map(|r| r.player.clone()).collect()
    }

    /// Put a player on the first free grid slot.
    pub fn add_player(&mut self, player: Player) {
        let grid_slot = (0..)
            .find(|slot| !self.racers.values().any(|r| r.grid_slot == *slot))
            .unwrap_or_default();
        let spawn = self.track.spawn_point(grid_slot);
        let physics = catalog::vehicle_or_default(&player.vehicle_id).physics;
        info!(
            room = %self.room_id,
            player_id = player.id,
            grid_slot,
            vehicle = %player.vehicle_id,
            "Racer added"
        );
        self.racers.insert(
            player.id,
            Racer {
                player,
                physics,
                grid_slot,
                motion: MotionState::at(spawn.x, 0.0, spawn.z, spawn.yaw),
                effects: EffectSet::new(),
                progress: self.fresh_progress(),
                abilities: AbilityRuntimeState::new(),
                queue: VecDeque::new(),
                last_processed_input_seq: None,
            },
        );
    }

    /// Remove a player. Homing projectiles chasing them fly on straight.
    pub fn remove_player(&mut self, player_id: PlayerId) -> Option<Player> {
        let racer = self.racers.remove(&player_id)?;
        self.bumps.forget_player(player_id);
        for projectile in &mut self.projectiles {
            if projectile.target_id == Some(player_id) {
                projectile.target_id = None;
            }
        }
        self.projectiles.retain(|p| p.owner_id != player_id);
        Some(racer.player)
    }

    /// Queue an input frame for the next tick.
    ///
    /// Frames outside a running race, duplicates and frames at or below the
    /// last processed sequence are dropped.
    pub fn queue_input(&mut self, player_id: PlayerId, frame: InputFrame) {
        let limit = self.config.input_queue_limit;
        let running = self.phase == RacePhase::Running;
        let Some(racer) = self.racers.get_mut(&player_id) else {
            return;
        };
        if !running {
            debug!(player_id, seq = frame.seq, phase = ?self.phase, "dropping input outside race");
            return;
        }
        if racer.last_processed_input_seq.is_some_and(|last| frame.seq <= last) {
            debug!(player_id, seq = frame.seq, "dropping stale input");
            return;
        }
        let pos = racer.queue.partition_point(|queued| queued.seq < frame.seq);
        if racer.queue.get(pos).is_some_and(|queued| queued.seq == frame.seq) {
            return;
        }
        racer.queue.insert(pos, frame);
        while racer.queue.len() > limit {
            racer.queue.pop_front();
        }
    }

    /// Validate and resolve an ability activation against the ledger.
    ///
    /// Rejections are silent; the next snapshot's ledger corrects the
    /// client's optimistic state.
    pub fn activate_ability(
        &mut self,
        player_id: PlayerId,
        msg: &AbilityActivateMsg,
        now_ms: u64,
    ) -> Vec<RaceEventMsg> {
        if self.phase != RacePhase::Running {
            return Vec::new();
        }
        if msg.room_id != self.room_id {
            debug!(player_id, room = %msg.room_id, "ability for another room");
            return Vec::new();
        }
        let Some(manifest) = catalog::ability(&msg.ability_id) else {
            debug!(player_id, ability = %msg.ability_id, "unknown ability");
            return Vec::new();
        };
        let target_id = msg
            .target_player_id
            .filter(|id| *id != player_id && self.racers.contains_key(id));
        if manifest.delivery.needs_opponent() && target_id.is_none() {
            debug!(player_id, ability = manifest.id, "ability without a target ignored");
            return Vec::new();
        }
        let Some(racer) = self.racers.get_mut(&player_id) else {
            return Vec::new();
        };
        if let Err(e) = racer.abilities.try_activate(manifest, now_ms) {
            debug!(player_id, ability = manifest.id, seq = msg.seq, reason = %e, "activation rejected");
            return Vec::new();
        }
        let owner = racer.motion;

        let mut events = vec![
            RaceEventMsg::new(RaceEventKind::AbilityActivated, &self.room_id, now_ms)
                .with_player(player_id)
                .with_meta("abilityId", manifest.id)
                .with_meta("seq", msg.seq),
        ];

        match manifest.delivery {
            AbilityDelivery::Instant {
                effect,
                duration_ms,
                target,
            } => {
                let victim = match target {
                    AbilityTarget::SelfOnly => Some(player_id),
                    AbilityTarget::Opponent => target_id,
                };
                if let Some(victim) = victim
                    && let Some(racer) = self.racers.get_mut(&victim)
                {
                    racer.effects.apply(effect, duration_ms);
                    if victim != player_id {
                        events.push(
                            RaceEventMsg::new(RaceEventKind::AbilityHit, &self.room_id, now_ms)
                                .with_player(victim)
                                .with_meta("abilityId", manifest.id)
                                .with_meta("ownerId", player_id),
                        );
                    }
                }
            },
            AbilityDelivery::Projectile {
                lifetime_ms,
                homing,
                ..
            } => {
                let (sin, cos) = owner.yaw.sin_cos();
                let x = owner.x + sin * PROJECTILE_SPAWN_OFFSET;
                let z = owner.z + cos * PROJECTILE_SPAWN_OFFSET;
                let target_id = if homing { target_id } else { None };
                let yaw = target_id
                    .and_then(|id| self.racers.get(&id))
                    .map_or(owner.yaw, |t| heading_to(x, z, t.motion.x, t.motion.z));
                let id = self.next_projectile_id;
                self.next_projectile_id = self.next_projectile_id.wrapping_add(1);
                self.projectiles.push(Projectile {
                    id,
                    manifest,
                    owner_id: player_id,
                    target_id,
                    x,
                    z,
                    yaw,
                    remaining_ms: lifetime_ms,
                });
                if let Some(first) = events.first_mut() {
                    *first = first.clone().with_meta("projectileId", id);
                }
            },
        }
        events
    }

    /// Advance the room to `now_ms`. Returns the snapshot to broadcast and the
    /// events raised this tick.
    pub fn tick(&mut self, now_ms: u64) -> TickOutput {
        let gap_ms = self
            .last_tick_ms
            .map_or(0, |last| now_ms.saturating_sub(last).min(MAX_TICK_GAP_MS));
        self.last_tick_ms = Some(now_ms);

        let mut events = Vec::new();
        match self.phase {
            RacePhase::Idle => self.tick_lobby(now_ms, &mut events),
            RacePhase::Countdown => {
                if now_ms >= self.countdown_ends_ms {
                    self.phase = RacePhase::Running;
                    self.race_started_ms = now_ms;
                    info!(room = %self.room_id, "Race started");
                    events.push(RaceEventMsg::new(
                        RaceEventKind::RaceStarted,
                        &self.room_id,
                        now_ms,
                    ));
                }
            },
            RacePhase::Running => self.tick_race(now_ms, gap_ms as f32 / 1000.0, &mut events),
            RacePhase::Finished => {
                if now_ms >= self.race_finished_ms + self.config.post_race_reset_ms {
                    info!(room = %self.room_id, "Room back in lobby");
                    self.phase = RacePhase::Idle;
                    self.lobby_ready_at_ms = None;
                }
            },
        }

        self.snapshot_seq = self.snapshot_seq.wrapping_add(1);
        TickOutput {
            snapshot: self.snapshot(now_ms),
            events,
        }
    }

    /// Current state, stamped with the latest snapshot sequence.
    pub fn snapshot(&self, now_ms: u64) -> ServerSnapshot {
        let countdown_remaining_ms = if self.phase == RacePhase::Countdown {
            self.countdown_ends_ms.saturating_sub(now_ms)
        } else {
            0
        };
        let elapsed_ms = match self.phase {
            RacePhase::Running => now_ms.saturating_sub(self.race_started_ms),
            RacePhase::Finished => self.race_finished_ms.saturating_sub(self.race_started_ms),
            _ => 0,
        };
        ServerSnapshot {
            seq: self.snapshot_seq,
            server_time_ms: now_ms,
            players: self.racers.values().map(Racer::snapshot).collect(),
            hazards: self
                .track
                .hazards
                .iter()
                .enumerate()
                .map(|(i, h)| HazardState {
                    id: i as u32,
                    kind: h.kind,
                    x: h.x,
                    z: h.z,
                    radius: h.radius,
                })
                .collect(),
            powerups: self
                .track
                .powerup_pads
                .iter()
                .zip(&self.pad_ready_at_ms)
                .enumerate()
                .map(|(i, (pad, ready_at))| PowerupState {
                    id: i as u32,
                    x: pad.x,
                    z: pad.z,
                    active: now_ms >= *ready_at,
                })
                .collect(),
            projectiles: self
                .projectiles
                .iter()
                .map(|p| ProjectileState {
                    id: p.id,
                    ability_id: p.manifest.id.to_string(),
                    owner_id: p.owner_id,
                    target_id: p.target_id,
                    x: p.x,
                    z: p.z,
                    yaw: p.yaw,
                })
                .collect(),
            race_state: RaceStateSnapshot {
                phase: self.phase,
                countdown_remaining_ms,
                lap_count: self.lap_count(),
                elapsed_ms,
            },
        }
    }

    fn fresh_progress(&self) -> RaceProgress {
        RaceProgress {
            checkpoint_index: 1 % self.track.checkpoints.len().max(1) as u32,
            ..RaceProgress::default()
        }
    }

    fn tick_lobby(&mut self, now_ms: u64, events: &mut Vec<RaceEventMsg>) {
        if self.racers.len() < self.config.min_players {
            self.lobby_ready_at_ms = None;
            return;
        }
        let ready_at = *self
            .lobby_ready_at_ms
            .get_or_insert(now_ms + self.config.lobby_wait_ms);
        if now_ms < ready_at {
            return;
        }

        self.reset_for_race();
        self.phase = RacePhase::Countdown;
        self.countdown_ends_ms = now_ms + self.config.countdown_ms;
        info!(
            room = %self.room_id,
            track = self.track.id,
            racers = self.racers.len(),
            "Countdown started"
        );
        events.push(
            RaceEventMsg::new(RaceEventKind::CountdownStarted, &self.room_id, now_ms)
                .with_meta("countdownMs", self.config.countdown_ms)
                .with_meta("lapCount", self.lap_count())
                .with_meta("trackId", self.track.id),
        );
    }

    /// Grid every racer and wipe per-race state. Input sequence numbers are
    /// kept so acknowledgements stay monotonic across races.
    fn reset_for_race(&mut self) {
        let progress = self.fresh_progress();
        for racer in self.racers.values_mut() {
            let spawn = self.track.spawn_point(racer.grid_slot);
            racer.motion = MotionState::at(spawn.x, 0.0, spawn.z, spawn.yaw);
            racer.effects.clear();
            racer.progress = progress;
            racer.abilities.reset();
            racer.queue.clear();
        }
        self.bumps.clear();
        self.projectiles.clear();
        self.pad_ready_at_ms.iter_mut().for_each(|t| *t = 0);
        self.first_finish_ms = None;
        self.finishers = 0;
    }

    fn tick_race(&mut self, now_ms: u64, dt: f32, events: &mut Vec<RaceEventMsg>) {
        self.process_inputs(now_ms, events);
        self.update_projectiles(now_ms, dt, events);
        self.apply_track_features(now_ms);
        self.resolve_bumps(now_ms, events);
        self.bumps.prune(now_ms);

        let all_finished = self.racers.values().all(Racer::is_finished);
        let grace_over = self
            .first_finish_ms
            .is_some_and(|t| now_ms >= t + self.config.finish_grace_ms);
        if self.racers.is_empty() || all_finished || grace_over {
            self.finish_race(now_ms, events);
        }
    }

    fn process_inputs(&mut self, now_ms: u64, events: &mut Vec<RaceEventMsg>) {
        let lap_count = self.lap_count();
        let checkpoints = self.track.checkpoints;
        for racer in self.racers.values_mut() {
            while let Some(frame) = racer.queue.pop_front() {
                if racer.last_processed_input_seq.is_some_and(|last| frame.seq <= last) {
                    continue;
                }
                let controls = racer.effects.gate_controls(&frame.controls);
                let tuned = racer.effects.scaled_physics(&racer.physics);
                let next = motion::step(&racer.motion, &controls, INPUT_FRAME_DT, &tuned);
                racer.effects.tick(INPUT_FRAME_DT * 1000.0);
                racer.progress.distance += racer.motion.distance_to(&next);
                racer.motion = next;
                racer.last_processed_input_seq = Some(frame.seq);

                if racer.is_finished() || checkpoints.is_empty() {
                    continue;
                }
                let next_index = racer.progress.checkpoint_index as usize % checkpoints.len();
                let gate = checkpoints[next_index];
                if !gate.contains(racer.motion.x, racer.motion.z) {
                    continue;
                }
                racer.progress.checkpoint_index = ((next_index + 1) % checkpoints.len()) as u32;
                if next_index != 0 {
                    continue;
                }
                racer.progress.lap += 1;
                events.push(
                    RaceEventMsg::new(RaceEventKind::LapCompleted, &self.room_id, now_ms)
                        .with_player(racer.player.id)
                        .with_meta("lap", racer.progress.lap),
                );
                if racer.progress.lap >= lap_count {
                    racer.progress.finished_at_ms = Some(now_ms);
                    self.finishers += 1;
                    self.first_finish_ms.get_or_insert(now_ms);
                    info!(
                        room = %self.room_id,
                        player_id = racer.player.id,
                        position = self.finishers,
                        "Player finished"
                    );
                    events.push(
                        RaceEventMsg::new(RaceEventKind::PlayerFinished, &self.room_id, now_ms)
                            .with_player(racer.player.id)
                            .with_meta("position", self.finishers)
                            .with_meta("raceTimeMs", now_ms.saturating_sub(self.race_started_ms)),
                    );
                }
            }
        }
    }

    fn update_projectiles(&mut self, now_ms: u64, dt: f32, events: &mut Vec<RaceEventMsg>) {
        let racers = &mut self.racers;
        let room_id = &self.room_id;
        self.projectiles.retain_mut(|p| {
            let AbilityDelivery::Projectile {
                effect,
                duration_ms,
                speed,
                hit_radius,
                ..
            } = p.manifest.delivery
            else {
                return false;
            };

            if let Some(target) = p.target_id.and_then(|id| racers.get(&id)) {
                let desired = heading_to(p.x, p.z, target.motion.x, target.motion.z);
                let max_turn = HOMING_TURN_RATE * dt;
                let turn = shortest_angle_delta(p.yaw, desired).clamp(-max_turn, max_turn);
                p.yaw = wrap_angle(p.yaw + turn);
            }
            let (sin, cos) = p.yaw.sin_cos();
            p.x += sin * speed * dt;
            p.z += cos * speed * dt;
            p.remaining_ms -= dt * 1000.0;

            let hit = racers
                .values()
                .filter(|r| r.player.id != p.owner_id)
                .map(|r| (r.player.id, planar_distance(p.x, p.z, r.motion.x, r.motion.z)))
                .filter(|(_, d)| *d <= hit_radius)
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(id, _)| id);
            if let Some(victim) = hit
                && let Some(racer) = racers.get_mut(&victim)
            {
                racer.effects.apply(effect, duration_ms);
                events.push(
                    RaceEventMsg::new(RaceEventKind::AbilityHit, room_id, now_ms)
                        .with_player(victim)
                        .with_meta("abilityId", p.manifest.id)
                        .with_meta("ownerId", p.owner_id)
                        .with_meta("projectileId", p.id),
                );
                return false;
            }
            p.remaining_ms > 0.0
        });
    }

    fn apply_track_features(&mut self, now_ms: u64) {
        for racer in self.racers.values_mut() {
            let (x, z) = (racer.motion.x, racer.motion.z);
            for hazard in self.track.hazards {
                if planar_distance(x, z, hazard.x, hazard.z) <= hazard.radius
                    && !racer.effects.has(hazard.effect)
                {
                    racer.effects.apply(hazard.effect, hazard.duration_ms);
                }
            }
            for (pad, ready_at) in self.track.powerup_pads.iter().zip(&mut self.pad_ready_at_ms) {
                if now_ms >= *ready_at && planar_distance(x, z, pad.x, pad.z) <= pad.radius {
                    racer.effects.apply(pad.effect, pad.duration_ms);
                    *ready_at = now_ms + pad.respawn_ms;
                }
            }
        }
    }

    fn resolve_bumps(&mut self, now_ms: u64, events: &mut Vec<RaceEventMsg>) {
        let contacts: Vec<CarContact> = self
            .racers
            .values()
            .map(|r| CarContact {
                player_id: r.player.id,
                state: r.motion,
            })
            .collect();

        for (i, a) in contacts.iter().enumerate() {
            for b in &contacts[i + 1..] {
                let Some(outcome) = self.bumps.resolve(now_ms, a, b) else {
                    continue;
                };
                for &(player_id, kind, ms) in &outcome.effects {
                    if let Some(racer) = self.racers.get_mut(&player_id) {
                        racer.effects.apply(kind, ms);
                    }
                }
                debug!(
                    room = %self.room_id,
                    rammer = outcome.rammer,
                    bumped = outcome.bumped,
                    impact_speed = outcome.impact_speed,
                    "Bump"
                );
                events.push(
                    RaceEventMsg::new(RaceEventKind::CarBumped, &self.room_id, now_ms)
                        .with_player(outcome.bumped)
                        .with_meta("rammerId", outcome.rammer)
                        .with_meta("impactSpeed", outcome.impact_speed)
                        .with_meta("stunned", outcome.stunned),
                );
                if outcome.flipped {
                    events.push(
                        RaceEventMsg::new(RaceEventKind::CarFlipped, &self.room_id, now_ms)
                            .with_player(outcome.bumped)
                            .with_meta("rammerId", outcome.rammer),
                    );
                }
            }
        }
    }

    fn finish_race(&mut self, now_ms: u64, events: &mut Vec<RaceEventMsg>) {
        self.phase = RacePhase::Finished;
        self.race_finished_ms = now_ms;
        self.projectiles.clear();
        for racer in self.racers.values_mut() {
            racer.queue.clear();
        }
        let results = self.standings();
        info!(room = %self.room_id, ?results, "Race finished");
        events.push(
            RaceEventMsg::new(RaceEventKind::RaceFinished, &self.room_id, now_ms)
                .with_meta("results", results),
        );
    }

    /// Player ids in finishing order: finishers by time, then the rest by
    /// how far round the track they got.
    pub fn standings(&self) -> Vec<PlayerId> {
        let mut order: Vec<&Racer> = self.racers.values().collect();
        order.sort_by(|a, b| match (a.progress.finished_at_ms, b.progress.finished_at_ms) {
            (Some(ta), Some(tb)) => ta.cmp(&tb),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b
                .progress
                .lap
                .cmp(&a.progress.lap)
                .then(b.progress.distance.total_cmp(&a.progress.distance)),
        });
        order.into_iter().map(|r| r.player.id).collect()
    }
}

fn planar_distance(ax: f32, az: f32, bx: f32, bz: f32) -> f32 {
    let dx = bx - ax;
    let dz = bz - az;
    (dx * dx + dz * dz).sqrt()
}

/// Yaw that faces from `(x, z)` toward `(tx, tz)`; 0 faces +z.
fn heading_to(x: f32, z: f32, tx: f32, tz: f32) -> f32 {
    (tx - x).atan2(tz - z)
}
