use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::effects::StatusEffectKind;

/// Who an instant ability resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityTarget {
    SelfOnly,
    Opponent,
}

/// How an ability's effect reaches its target. Dispatched once, when the
/// server resolves the activation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AbilityDelivery {
    /// Effect applied immediately to the resolved target.
    Instant {
        effect: StatusEffectKind,
        duration_ms: f32,
        target: AbilityTarget,
    },
    /// A projectile entity is spawned; the effect lands on hit.
    Projectile {
        effect: StatusEffectKind,
        duration_ms: f32,
        speed: f32,
        hit_radius: f32,
        lifetime_ms: f32,
        /// Steers toward the target instead of flying straight.
        homing: bool,
    },
}

impl AbilityDelivery {
    pub fn effect(&self) -> (StatusEffectKind, f32) {
        match *self {
            AbilityDelivery::Instant {
                effect,
                duration_ms,
                ..
            }
            | AbilityDelivery::Projectile {
                effect,
                duration_ms,
                ..
            } => (effect, duration_ms),
        }
    }

    /// Whether the activation needs an opponent to resolve against.
    pub fn needs_opponent(&self) -> bool {
        match self {
            AbilityDelivery::Instant { target, .. } => *target == AbilityTarget::Opponent,
            AbilityDelivery::Projectile { homing, .. } => *homing,
        }
    }
}

/// Static description of one ability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityManifest {
    pub id: &'static str,
    pub name: &'static str,
    pub base_cooldown_ms: u64,
    /// `f64::INFINITY` for abilities without a per-race limit.
    pub max_uses_per_race: f64,
    pub delivery: AbilityDelivery,
}

/// Usage check shared by every gate: non-finite limits always pass.
pub fn usage_allows(uses_this_race: u32, max_uses_per_race: f64) -> bool {
    !max_uses_per_race.is_finite() || f64::from(uses_this_race) < max_uses_per_race
}

/// Inputs to the client-side activation precondition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivationGate {
    /// Edge-triggered: true only on the tick the key went down.
    pub just_pressed: bool,
    pub now_ms: u64,
    pub ready_at_ms: u64,
    pub uses_this_race: u32,
    pub max_uses_per_race: f64,
}

impl ActivationGate {
    pub fn can_emit_activation(&self) -> bool {
        self.just_pressed
            && self.now_ms >= self.ready_at_ms
            && usage_allows(self.uses_this_race, self.max_uses_per_race)
    }
}

/// Why an activation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ActivationRejected {
    #[error("ability cooling down for another {remaining_ms}ms")]
    CoolingDown { remaining_ms: u64 },
    #[error("ability used {uses} times this race")]
    UsesExhausted { uses: u32 },
}

/// Cooldown and usage for one ability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilitySlot {
    pub ready_at_ms: u64,
    pub uses_this_race: u32,
}

/// Wire form of one ledger slot, carried in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityLedgerEntry {
    pub ability_id: String,
    pub ready_at_ms: u64,
    pub uses_this_race: u32,
}

/// Per-ability cooldown/usage ledger for one racer, for one race.
#[derive(Debug, Clone, Default)]
pub struct AbilityRuntimeState {
    slots: HashMap<String, AbilitySlot>,
}

impl AbilityRuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, ability_id: &str) -> AbilitySlot {
        self.slots.get(ability_id).copied().unwrap_or_default()
    }

    /// Server-side precondition check (no edge trigger; the message itself
    /// is the press).
    pub fn check(&self, manifest: &AbilityManifest, now_ms: u64) -> Result<(), ActivationRejected> {
        let slot = self.slot(manifest.id);
        if now_ms < slot.ready_at_ms {
            return Err(ActivationRejected::CoolingDown {
                remaining_ms: slot.ready_at_ms - now_ms,
            });
        }
        if !usage_allows(slot.uses_this_race, manifest.max_uses_per_race) {
            return Err(ActivationRejected::UsesExhausted {
                uses: slot.uses_this_race,
            });
        }
        Ok(())
    }

    pub fn record_activation(&mut self, manifest: &AbilityManifest, now_ms: u64) {
        let slot = self.slots.entry(manifest.id.to_string()).or_default();
        slot.ready_at_ms = now_ms + manifest.base_cooldown_ms;
        slot.uses_this_race += 1;
    }

    /// Check then record.
    pub fn try_activate(
        &mut self,
        manifest: &AbilityManifest,
        now_ms: u64,
    ) -> Result<(), ActivationRejected> {
        self.check(manifest, now_ms)?;
        self.record_activation(manifest, now_ms);
        Ok(())
    }

    /// Clear all cooldowns and usage counts (race start).
    pub fn reset(&mut self) {
        self.slots.clear();
    }

    /// Replace local state with the authoritative ledger.
    pub fn overwrite_from(&mut self, ledger: &[AbilityLedgerEntry]) {
        self.slots = ledger
            .iter()
            .map(|entry| {
                (
                    entry.ability_id.clone(),
                    AbilitySlot {
                        ready_at_ms: entry.ready_at_ms,
                        uses_this_race: entry.uses_this_race,
                    },
                )
            })
            .collect();
    }

    /// Ledger entries sorted by ability id, for snapshots.
    pub fn ledger(&self) -> Vec<AbilityLedgerEntry> {
        let mut entries: Vec<_> = self
            .slots
            .iter()
            .map(|(id, slot)| AbilityLedgerEntry {
                ability_id: id.clone(),
                ready_at_ms: slot.ready_at_ms,
                uses_this_race: slot.uses_this_race,
            })
            .collect();
        entries.sort_by(|a, b| a.ability_id.cmp(&b.ability_id));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITED: AbilityManifest = AbilityManifest {
        id: "test_limited",
        name: "Limited",
        base_cooldown_ms: 1000,
        max_uses_per_race: 2.0,
        delivery: AbilityDelivery::Instant {
            effect: StatusEffectKind::Stunned,
            duration_ms: 500.0,
            target: AbilityTarget::Opponent,
        },
    };

    fn gate(just_pressed: bool, uses: u32, limit: f64) -> ActivationGate {
        ActivationGate {
            just_pressed,
            now_ms: 5000,
            ready_at_ms: 0,
            uses_this_race: uses,
            max_uses_per_race: limit,
        }
    }

    #[test]
    fn not_pressed_never_emits() {
        assert!(!gate(false, 0, f64::INFINITY).can_emit_activation());
        assert!(!gate(false, 0, 3.0).can_emit_activation());
    }

    #[test]
    fn finite_limit_blocks_when_exhausted() {
        assert!(gate(true, 1, 2.0).can_emit_activation());
        assert!(!gate(true, 2, 2.0).can_emit_activation());
        assert!(!gate(true, 7, 2.0).can_emit_activation());
    }

    #[test]
    fn unlimited_ignores_usage_count() {
        assert!(gate(true, 0, f64::INFINITY).can_emit_activation());
        assert!(gate(true, u32::MAX, f64::INFINITY).can_emit_activation());
        assert!(gate(true, 1000, f64::NAN).can_emit_activation());
    }

    #[test]
    fn cooldown_blocks_until_ready() {
        let mut g = gate(true, 0, f64::INFINITY);
        g.ready_at_ms = 5001;
        assert!(!g.can_emit_activation());
        g.ready_at_ms = 5000;
        assert!(g.can_emit_activation());
    }

    #[test]
    fn ledger_enforces_cooldown_then_limit() {
        let mut ledger = AbilityRuntimeState::new();
        assert!(ledger.try_activate(&LIMITED, 0).is_ok());
        assert_eq!(
            ledger.try_activate(&LIMITED, 400),
            Err(ActivationRejected::CoolingDown { remaining_ms: 600 })
        );
        assert!(ledger.try_activate(&LIMITED, 1000).is_ok());
        assert_eq!(
            ledger.try_activate(&LIMITED, 5000),
            Err(ActivationRejected::UsesExhausted { uses: 2 })
        );
        ledger.reset();
        assert!(ledger.try_activate(&LIMITED, 5000).is_ok());
    }

    #[test]
    fn overwrite_replaces_optimistic_state() {
        let mut local = AbilityRuntimeState::new();
        local.record_activation(&LIMITED, 100);
        assert_eq!(local.slot("test_limited").uses_this_race, 1);

        // Server never accepted it.
        local.overwrite_from(&[]);
        assert_eq!(local.slot("test_limited"), AbilitySlot::default());

        let mut server = AbilityRuntimeState::new();
        server.record_activation(&LIMITED, 200);
        local.overwrite_from(&server.ledger());
        assert_eq!(local.slot("test_limited").ready_at_ms, 1200);
    }
}
