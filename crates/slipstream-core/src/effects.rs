use serde::{Deserialize, Serialize};

use crate::motion::{ControlState, PhysicsConfig};

/// Top-speed multiplier while `Slowed`.
pub const SLOWED_SPEED_FACTOR: f32 = 0.6;
/// Top-speed and acceleration multiplier while `Boosted`.
pub const BOOSTED_SPEED_FACTOR: f32 = 1.25;

/// Timed status effects that can be applied to a car.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEffectKind {
    /// All control input suppressed.
    Stunned,
    /// Drive (throttle/boost) suppressed after a collision; steering still works.
    DriveRecoveryLock,
    /// Knocked over. Controls suppressed; rendered upside down.
    Flipped,
    Slowed,
    Boosted,
}

/// One active effect with its remaining duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEffect {
    pub kind: StatusEffectKind,
    pub remaining_ms: f32,
}

impl ActiveEffect {
    pub fn new(kind: StatusEffectKind, duration_ms: f32) -> Self {
        Self {
            kind,
            remaining_ms: duration_ms,
        }
    }

    pub fn tick(&mut self, dt_ms: f32) {
        if self.remaining_ms.is_finite() {
            self.remaining_ms -= dt_ms;
        }
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_ms <= 0.0
    }
}

/// The set of effects active on one car. At most one entry per kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectSet {
    effects: Vec<ActiveEffect>,
}

impl EffectSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an effect. Re-applying an active kind keeps the longer duration.
    pub fn apply(&mut self, kind: StatusEffectKind, duration_ms: f32) {
        if duration_ms <= 0.0 {
            return;
        }
        match self.effects.iter_mut().find(|e| e.kind == kind) {
            Some(existing) => existing.remaining_ms = existing.remaining_ms.max(duration_ms),
            None => self.effects.push(ActiveEffect::new(kind, duration_ms)),
        }
    }

    /// Count down all effects and drop the expired ones.
    pub fn tick(&mut self, dt_ms: f32) {
        for effect in &mut self.effects {
            effect.tick(dt_ms);
        }
        self.effects.retain(|e| !e.is_expired());
    }

    pub fn has(&self, kind: StatusEffectKind) -> bool {
        self.effects.iter().any(|e| e.kind == kind)
    }

    pub fn remaining_ms(&self, kind: StatusEffectKind) -> Option<f32> {
        self.effects
            .iter()
            .find(|e| e.kind == kind)
            .map(|e| e.remaining_ms)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveEffect> {
        self.effects.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn clear(&mut self) {
        self.effects.clear();
    }

    /// Mask the controls the motion model is allowed to see.
    pub fn gate_controls(&self, controls: &ControlState) -> ControlState {
        if self.has(StatusEffectKind::Stunned) || self.has(StatusEffectKind::Flipped) {
            return ControlState {
                cruise_control: controls.cruise_control,
                ..ControlState::default()
            };
        }
        let mut gated = *controls;
        if self.has(StatusEffectKind::DriveRecoveryLock) {
            gated.throttle = 0;
            gated.boost = false;
        }
        if self.has(StatusEffectKind::Slowed) {
            gated.boost = false;
        }
        gated
    }

    /// Vehicle tuning adjusted for speed-affecting effects.
    pub fn scaled_physics(&self, config: &PhysicsConfig) -> PhysicsConfig {
        let mut scaled = *config;
        if self.has(StatusEffectKind::Slowed) {
            scaled.max_forward_speed *= SLOWED_SPEED_FACTOR;
        }
        if self.has(StatusEffectKind::Boosted) {
            scaled.max_forward_speed *= BOOSTED_SPEED_FACTOR;
            scaled.acceleration *= BOOSTED_SPEED_FACTOR;
        }
        scaled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_controls() -> ControlState {
        ControlState {
            throttle: 2,
            steering: 1,
            boost: true,
            brake: false,
            handbrake: true,
            cruise_control: true,
        }
    }

    #[test]
    fn effect_expires_after_duration() {
        let mut set = EffectSet::new();
        set.apply(StatusEffectKind::Stunned, 100.0);
        set.tick(60.0);
        assert!(set.has(StatusEffectKind::Stunned));
        set.tick(60.0);
        assert!(!set.has(StatusEffectKind::Stunned));
        assert!(set.is_empty());
    }

    #[test]
    fn reapply_keeps_longer_duration() {
        let mut set = EffectSet::new();
        set.apply(StatusEffectKind::Slowed, 500.0);
        set.apply(StatusEffectKind::Slowed, 200.0);
        assert_eq!(set.remaining_ms(StatusEffectKind::Slowed), Some(500.0));
        set.apply(StatusEffectKind::Slowed, 900.0);
        assert_eq!(set.remaining_ms(StatusEffectKind::Slowed), Some(900.0));
        assert_eq!(set.iter().count(), 1);
    }

    #[test]
    fn stun_suppresses_all_driving_controls() {
        let mut set = EffectSet::new();
        set.apply(StatusEffectKind::Stunned, 1000.0);
        let gated = set.gate_controls(&full_controls());
        assert_eq!(gated.throttle, 0);
        assert_eq!(gated.steering, 0);
        assert!(!gated.boost);
        assert!(!gated.handbrake);
        assert!(gated.cruise_control);
    }

    #[test]
    fn drive_recovery_lock_keeps_steering() {
        let mut set = EffectSet::new();
        set.apply(StatusEffectKind::DriveRecoveryLock, 250.0);
        let gated = set.gate_controls(&full_controls());
        assert_eq!(gated.throttle, 0);
        assert!(!gated.boost);
        assert_eq!(gated.steering, 1);
    }

    #[test]
    fn slowed_caps_top_speed() {
        let mut set = EffectSet::new();
        let base = PhysicsConfig::default();
        assert_eq!(set.scaled_physics(&base), base);
        set.apply(StatusEffectKind::Slowed, 1000.0);
        let scaled = set.scaled_physics(&base);
        assert!(scaled.max_forward_speed < base.max_forward_speed);
    }
}
