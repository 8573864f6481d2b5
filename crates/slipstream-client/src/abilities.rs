use tracing::debug;

use slipstream_core::ability::{
    AbilityLedgerEntry, AbilityRuntimeState, AbilitySlot, ActivationGate,
};
use slipstream_core::catalog;
use slipstream_core::net::messages::AbilityActivateMsg;
use slipstream_core::player::PlayerId;

/// How long an optimistic activation survives snapshots that do not yet
/// reflect it. After this the server's ledger wins.
pub const PENDING_GRACE_MS: u64 = 1000;

#[derive(Debug, Clone)]
struct PendingActivation {
    ability_id: String,
    uses_before: u32,
    sent_at_ms: u64,
}

/// Client side of ability activation: edge-triggered, optimistic, and
/// overwritten by the authoritative ledger carried in snapshots.
#[derive(Debug, Clone, Default)]
pub struct AbilityController {
    runtime: AbilityRuntimeState,
    activation_seq: u32,
    pending: Vec<PendingActivation>,
}

impl AbilityController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, ability_id: &str) -> AbilitySlot {
        self.runtime.slot(ability_id)
    }

    pub fn cooldown_remaining_ms(&self, ability_id: &str, now_ms: u64) -> u64 {
        self.slot(ability_id).ready_at_ms.saturating_sub(now_ms)
    }

    pub fn activation_seq(&self) -> u32 {
        self.activation_seq
    }

    /// Evaluate one press. Returns the message to send when the gate passes.
    ///
    /// `target` must be resolved by the caller; an ability that needs an
    /// opponent is not fired without one.
    pub fn try_activate(
        &mut self,
        ability_id: &str,
        just_pressed: bool,
        now_ms: u64,
        room_id: &str,
        target: Option<PlayerId>,
    ) -> Option<AbilityActivateMsg> {
        let Some(manifest) = catalog::ability(ability_id) else {
            debug!(ability_id, "unknown ability");
            return None;
        };
        let slot = self.runtime.slot(manifest.id);
        let gate = ActivationGate {
            just_pressed,
            now_ms,
            ready_at_ms: slot.ready_at_ms,
            uses_this_race: slot.uses_this_race,
            max_uses_per_race: manifest.max_uses_per_race,
        };
        if !gate.can_emit_activation() {
            return None;
        }
        if manifest.delivery.needs_opponent() && target.is_none() {
            return None;
        }

        self.activation_seq += 1;
        self.runtime.record_activation(manifest, now_ms);
        self.pending.push(PendingActivation {
            ability_id: manifest.id.to_string(),
            uses_before: slot.uses_this_race,
            sent_at_ms: now_ms,
        });

        Some(AbilityActivateMsg {
            ability_id: manifest.id.to_string(),
            seq: self.activation_seq,
            room_id: room_id.to_string(),
            target_player_id: target,
        })
    }

    /// Replace local state with the server's ledger. Activations still in
    /// flight are re-applied; ones the server never confirmed within
    /// [`PENDING_GRACE_MS`] are dropped, reverting them.
    pub fn apply_ledger(&mut self, ledger: &[AbilityLedgerEntry], now_ms: u64) {
        self.runtime.overwrite_from(ledger);
        let runtime = &mut self.runtime;
        self.pending.retain(|p| {
            let confirmed = runtime.slot(&p.ability_id).uses_this_race > p.uses_before;
            let expired = now_ms.saturating_sub(p.sent_at_ms) >= PENDING_GRACE_MS;
            if confirmed || expired {
                if expired && !confirmed {
                    debug!(ability_id = %p.ability_id, "activation not confirmed, reverting");
                }
                return false;
            }
            if let Some(manifest) = catalog::ability(&p.ability_id) {
                runtime.record_activation(manifest, p.sent_at_ms);
            }
            true
        });
    }

    /// New race: all cooldowns and counts clear. The activation seq keeps
    /// counting.
    pub fn reset(&mut self) {
        self.runtime.reset();
        self.pending.clear();
    }
}
