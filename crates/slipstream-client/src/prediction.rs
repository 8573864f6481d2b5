use std::collections::VecDeque;

use glam::Vec3;
use tracing::debug;

use slipstream_core::effects::EffectSet;
use slipstream_core::motion::{self, MotionState, PhysicsConfig};
use slipstream_core::net::messages::{InputFrame, ServerSnapshot};
use slipstream_core::player::PlayerId;

use crate::config::CorrectionThresholds;

/// Whether the engine has a baseline to predict from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionPhase {
    /// No authoritative state seen yet; local inputs are not simulated.
    NoTarget,
    Predicting,
}

/// How the render layer should present a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionMode {
    /// Prediction matched; nothing to show.
    None,
    /// Blend visually toward the corrected state.
    Soft,
    /// Snap immediately.
    Hard,
}

/// Record of the most recent reconciliation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionSnapshot {
    /// Input seq the server acknowledged.
    pub sequence: u32,
    pub position_error: f32,
    pub yaw_error: f32,
    /// Inputs sent but not yet acknowledged.
    pub input_lead: u32,
    /// Jump in the predicted position caused by the correction (new - old).
    pub applied_position_delta: Vec3,
    pub mode: CorrectionMode,
}

/// Result of offering a snapshot to the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    /// Older than a snapshot already processed; dropped.
    Stale,
    /// Local player absent or none of its inputs processed yet.
    NotAcknowledged,
    Reconciled(CorrectionSnapshot),
}

#[derive(Debug, Clone)]
struct PredictedFrame {
    frame: InputFrame,
    dt: f32,
    state_after: MotionState,
}

/// Optimistic local simulation with authoritative rollback and replay.
#[derive(Debug, Clone)]
pub struct PredictionEngine {
    phase: PredictionPhase,
    state: MotionState,
    effects: EffectSet,
    history: VecDeque<PredictedFrame>,
    capacity: usize,
    thresholds: CorrectionThresholds,
    last_snapshot_seq: Option<u32>,
    /// Last acknowledged seq and the authoritative state it produced. A
    /// repeated ack compares against this, its frame having left history.
    last_acked: Option<(u32, MotionState)>,
    last_correction: Option<CorrectionSnapshot>,
}

impl PredictionEngine {
    pub fn new(capacity: usize, thresholds: CorrectionThresholds) -> Self {
        Self {
            phase: PredictionPhase::NoTarget,
            state: MotionState::default(),
            effects: EffectSet::default(),
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            thresholds,
            last_snapshot_seq: None,
            last_acked: None,
            last_correction: None,
        }
    }

    pub fn phase(&self) -> PredictionPhase {
        self.phase
    }

    /// Current predicted state of the local car.
    pub fn state(&self) -> &MotionState {
        &self.state
    }

    pub fn effects(&self) -> &EffectSet {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut EffectSet {
        &mut self.effects
    }

    /// Latest snapshot seq processed, for `ackSnapshotSeq`.
    pub fn last_snapshot_seq(&self) -> Option<u32> {
        self.last_snapshot_seq
    }

    pub fn last_correction(&self) -> Option<&CorrectionSnapshot> {
        self.last_correction.as_ref()
    }

    pub fn pending_inputs(&self) -> usize {
        self.history.len()
    }

    /// Predicted state recorded right after input `seq`, if still retained.
    pub fn predicted_at(&self, seq: u32) -> Option<MotionState> {
        self.history
            .iter()
            .find(|p| p.frame.seq == seq)
            .map(|p| p.state_after)
    }

    /// Adopt a baseline without reconciliation (spawn / join).
    pub fn set_target(&mut self, state: MotionState, effects: EffectSet) {
        self.state = state;
        self.effects = effects;
        self.history.clear();
        self.phase = PredictionPhase::Predicting;
    }

    /// Simulate a freshly emitted frame immediately and keep it for replay.
    pub fn apply_local_input(&mut self, frame: InputFrame, dt: f32, physics: &PhysicsConfig) {
        if self.phase == PredictionPhase::NoTarget {
            return;
        }
        self.state = advance(&self.state, &mut self.effects, &frame, dt, physics);
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(PredictedFrame {
            frame,
            dt,
            state_after: self.state,
        });
    }

    /// Reconcile against an authoritative snapshot.
    ///
    /// `local_seq` is the seq of the newest frame sent.
    pub fn reconcile(
        &mut self,
        snapshot: &ServerSnapshot,
        local_player_id: PlayerId,
        physics: &PhysicsConfig,
        local_seq: u32,
    ) -> ReconcileOutcome {
        if let Some(last) = self.last_snapshot_seq
            && snapshot.seq < last
        {
            debug!(seq = snapshot.seq, last, "dropping stale snapshot");
            return ReconcileOutcome::Stale;
        }
        self.last_snapshot_seq = Some(snapshot.seq);

        let Some(authoritative) = snapshot.player(local_player_id) else {
            return ReconcileOutcome::NotAcknowledged;
        };
        if self.phase == PredictionPhase::NoTarget {
            self.set_target(authoritative.motion, authoritative.effects.clone());
        }
        let Some(ack) = authoritative.last_processed_input_seq else {
            return ReconcileOutcome::NotAcknowledged;
        };

        let ack_regressed = self.last_acked.is_some_and(|(prev, _)| ack < prev);
        let recorded = self.predicted_at(ack).or_else(|| {
            self.last_acked
                .filter(|&(prev, _)| prev == ack)
                .map(|(_, state)| state)
        });
        let compare_to = recorded.unwrap_or(self.state);
        let position_error = compare_to.distance_to(&authoritative.motion);
        let yaw_error = compare_to.yaw_error_to(&authoritative.motion);

        let t = &self.thresholds;
        let mode = if recorded.is_none()
            || ack_regressed
            || position_error > t.position_hard
            || yaw_error > t.yaw_hard
        {
            CorrectionMode::Hard
        } else if position_error < t.position_epsilon && yaw_error < t.yaw_epsilon {
            CorrectionMode::None
        } else {
            CorrectionMode::Soft
        };

        // Rebaseline, then replay everything the server has not seen.
        let before = self.state;
        self.state = authoritative.motion;
        self.effects = authoritative.effects.clone();
        self.history.retain(|p| p.frame.seq > ack);
        for predicted in &mut self.history {
            self.state = advance(
                &self.state,
                &mut self.effects,
                &predicted.frame,
                predicted.dt,
                physics,
            );
            predicted.state_after = self.state;
        }

        let correction = CorrectionSnapshot {
            sequence: ack,
            position_error,
            yaw_error,
            input_lead: local_seq.saturating_sub(ack),
            applied_position_delta: Vec3::from(self.state.position()) - Vec3::from(before.position()),
            mode,
        };
        if mode == CorrectionMode::Hard {
            debug!(
                player_id = local_player_id,
                seq = ack,
                position_error,
                yaw_error,
                "hard correction"
            );
        }
        self.last_acked = Some((ack, authoritative.motion));
        self.last_correction = Some(correction);
        ReconcileOutcome::Reconciled(correction)
    }

    /// Forget everything (disconnect or leaving the room).
    pub fn reset(&mut self) {
        self.phase = PredictionPhase::NoTarget;
        self.state = MotionState::default();
        self.effects.clear();
        self.history.clear();
        self.last_snapshot_seq = None;
        self.last_acked = None;
        self.last_correction = None;
    }
}

/// One gated motion step. The server runs the same sequence per frame.
fn advance(
    state: &MotionState,
    effects: &mut EffectSet,
    frame: &InputFrame,
    dt: f32,
    physics: &PhysicsConfig,
) -> MotionState {
    let controls = effects.gate_controls(&frame.controls);
    let tuned = effects.scaled_physics(physics);
    let next = motion::step(state, &controls, dt, &tuned);
    effects.tick(dt * 1000.0);
    next
}
