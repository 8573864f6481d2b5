use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::effects::StatusEffectKind;
use crate::motion::MotionState;
use crate::player::PlayerId;

/// Car body size (width, height, length) in metres.
pub const CAR_SIZE: [f32; 3] = [2.4, 1.8, 4.8];

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub center: [f32; 3],
    pub half_extents: [f32; 3],
}

impl Aabb {
    pub fn from_center_size(center: [f32; 3], size: [f32; 3]) -> Self {
        Self {
            center,
            half_extents: [size[0] * 0.5, size[1] * 0.5, size[2] * 0.5],
        }
    }

    /// Bounds of a car at its motion state. Heading is ignored.
    pub fn for_car(state: &MotionState) -> Self {
        Self::from_center_size(state.position(), CAR_SIZE)
    }

    /// True only when the boxes overlap on all three axes. Touching faces do
    /// not count.
    pub fn intersects(&self, other: &Aabb) -> bool {
        (0..3).all(|axis| {
            let gap = libm::fabsf(self.center[axis] - other.center[axis]);
            gap < self.half_extents[axis] + other.half_extents[axis]
        })
    }
}

/// Bump thresholds and durations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BumpConfig {
    /// Relative impact speed (m/s) below which contact is ignored.
    pub min_impact_speed: f32,
    /// Impact speed at which the bumped car is also stunned.
    pub stun_impact_speed: f32,
    /// Impact speed at which the bumped car may be flipped.
    pub flip_impact_speed: f32,
    pub rammer_lock_ms: f32,
    pub bumped_lock_ms: f32,
    pub stun_ms: f32,
    pub flip_ms: f32,
    /// Window during which the same two cars cannot bump again.
    pub pair_cooldown_ms: u64,
    /// Minimum time between two flips of the same car.
    pub flip_cooldown_ms: u64,
}

impl Default for BumpConfig {
    fn default() -> Self {
        Self {
            min_impact_speed: 4.0,
            stun_impact_speed: 18.0,
            flip_impact_speed: 26.0,
            rammer_lock_ms: 250.0,
            bumped_lock_ms: 900.0,
            stun_ms: 1200.0,
            flip_ms: 1500.0,
            pair_cooldown_ms: 600,
            flip_cooldown_ms: 5000,
        }
    }
}

/// One car taking part in a contact check.
#[derive(Debug, Clone, Copy)]
pub struct CarContact {
    pub player_id: PlayerId,
    pub state: MotionState,
}

/// A registered bump.
#[derive(Debug, Clone, PartialEq)]
pub struct BumpOutcome {
    pub rammer: PlayerId,
    pub bumped: PlayerId,
    pub impact_speed: f32,
    pub stunned: bool,
    pub flipped: bool,
    /// Effects to apply, per player.
    pub effects: Vec<(PlayerId, StatusEffectKind, f32)>,
}

impl BumpOutcome {
    pub fn effects_for(&self, player_id: PlayerId) -> impl Iterator<Item = (StatusEffectKind, f32)> {
        self.effects
            .iter()
            .filter(move |(id, _, _)| *id == player_id)
            .map(|(_, kind, ms)| (*kind, *ms))
    }
}

/// Applies the bump rules and owns their cooldowns. Used authoritatively by
/// the server and mirrored by the client for the local car.
///
/// The contact cooldown is keyed by the unordered pair: after `a` hits `b`,
/// `b` hitting `a` is suppressed too until `pair_cooldown_ms` elapses.
#[derive(Debug, Clone, Default)]
pub struct BumpResolver {
    pub config: BumpConfig,
    pair_ready_at: HashMap<(PlayerId, PlayerId), u64>,
    flip_ready_at: HashMap<PlayerId, u64>,
}

impl BumpResolver {
    pub fn new(config: BumpConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Check one pair of cars. Returns `None` if they are not touching, the
    /// impact is too soft, or the pair is still cooling down.
    pub fn resolve(&mut self, now_ms: u64, a: &CarContact, b: &CarContact) -> Option<BumpOutcome> {
        if a.player_id == b.player_id {
            return None;
        }
        if !Aabb::for_car(&a.state).intersects(&Aabb::for_car(&b.state)) {
            return None;
        }

        let (avx, avz) = a.state.planar_velocity();
        let (bvx, bvz) = b.state.planar_velocity();
        let (dvx, dvz) = (avx - bvx, avz - bvz);
        let impact_speed = libm::sqrtf(dvx * dvx + dvz * dvz);
        if impact_speed < self.config.min_impact_speed {
            return None;
        }

        let key = pair_key(a.player_id, b.player_id);
        if self.pair_ready_at.get(&key).is_some_and(|&t| now_ms < t) {
            return None;
        }
        self.pair_ready_at
            .insert(key, now_ms + self.config.pair_cooldown_ms);

        let (rammer, bumped) = if libm::fabsf(a.state.speed) >= libm::fabsf(b.state.speed) {
            (a.player_id, b.player_id)
        } else {
            (b.player_id, a.player_id)
        };

        let mut effects = vec![
            (
                rammer,
                StatusEffectKind::DriveRecoveryLock,
                self.config.rammer_lock_ms,
            ),
            (
                bumped,
                StatusEffectKind::DriveRecoveryLock,
                self.config.bumped_lock_ms,
            ),
        ];

        let stunned = impact_speed >= self.config.stun_impact_speed;
        if stunned {
            effects.push((bumped, StatusEffectKind::Stunned, self.config.stun_ms));
        }

        let flip_ready = self
            .flip_ready_at
            .get(&bumped)
            .is_none_or(|&t| now_ms >= t);
        let flipped = impact_speed >= self.config.flip_impact_speed && flip_ready;
        if flipped {
            self.flip_ready_at
                .insert(bumped, now_ms + self.config.flip_cooldown_ms);
            effects.push((bumped, StatusEffectKind::Flipped, self.config.flip_ms));
        }

        Some(BumpOutcome {
            rammer,
            bumped,
            impact_speed,
            stunned,
            flipped,
            effects,
        })
    }

    /// Drop cooldowns that have already expired.
    pub fn prune(&mut self, now_ms: u64) {
        self.pair_ready_at.retain(|_, t| *t > now_ms);
        self.flip_ready_at.retain(|_, t| *t > now_ms);
    }

    pub fn forget_player(&mut self, player_id: PlayerId) {
        self.pair_ready_at
            .retain(|(a, b), _| *a != player_id && *b != player_id);
        self.flip_ready_at.remove(&player_id);
    }

    pub fn clear(&mut self) {
        self.pair_ready_at.clear();
        self.flip_ready_at.clear();
    }
}

fn pair_key(a: PlayerId, b: PlayerId) -> (PlayerId, PlayerId) {
    if a <= b { (a, b) } else { (b, a) }
}
