use serde::{Deserialize, Serialize};

/// Coarse race lifecycle. Input and prediction only run while `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RacePhase {
    #[default]
    Idle,
    Countdown,
    Running,
    Finished,
}

/// Kinds carried by `RaceEvent` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceEventKind {
    CountdownStarted,
    RaceStarted,
    LapCompleted,
    PlayerFinished,
    RaceFinished,
    AbilityActivated,
    AbilityHit,
    CarBumped,
    CarFlipped,
}

impl RaceEventKind {
    /// Phase the event moves the race into, if any.
    pub fn target_phase(self) -> Option<RacePhase> {
        match self {
            RaceEventKind::CountdownStarted => Some(RacePhase::Countdown),
            RaceEventKind::RaceStarted => Some(RacePhase::Running),
            RaceEventKind::RaceFinished => Some(RacePhase::Finished),
            _ => None,
        }
    }
}

/// Client-side race phase, driven only by server events (and disconnects).
#[derive(Debug, Clone, Default)]
pub struct RaceStateMachine {
    phase: RacePhase,
    last_transition_ms: Option<u64>,
}

impl RaceStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == RacePhase::Running
    }

    /// Apply a server event. Returns `(from, to)` when the phase changed.
    ///
    /// Events stamped before the last transition are ignored, and the phase
    /// only moves forward; a new countdown after `Finished` starts the next
    /// race.
    pub fn apply(&mut self, kind: RaceEventKind, server_time_ms: u64) -> Option<(RacePhase, RacePhase)> {
        let target = kind.target_phase()?;
        if self.last_transition_ms.is_some_and(|t| server_time_ms < t) {
            return None;
        }
        let allowed = match (self.phase, target) {
            (RacePhase::Idle | RacePhase::Finished, RacePhase::Countdown) => true,
            (RacePhase::Idle | RacePhase::Countdown, RacePhase::Running) => true,
            (RacePhase::Countdown | RacePhase::Running, RacePhase::Finished) => true,
            _ => false,
        };
        if !allowed {
            return None;
        }
        let from = self.phase;
        self.phase = target;
        self.last_transition_ms = Some(server_time_ms);
        Some((from, target))
    }

    /// Adopt the phase reported in a join-time snapshot.
    pub fn sync(&mut self, phase: RacePhase, server_time_ms: u64) {
        self.phase = phase;
        self.last_transition_ms = Some(server_time_ms);
    }

    /// Connection lost.
    pub fn reset_to_idle(&mut self) {
        self.phase = RacePhase::Idle;
        self.last_transition_ms = None;
    }
}

/// Per-racer progress around the track.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceProgress {
    /// Laps completed.
    pub lap: u32,
    /// Next checkpoint to pass.
    pub checkpoint_index: u32,
    /// Distance travelled this race (m).
    pub distance: f32,
    pub finished_at_ms: Option<u64>,
}

/// Race-wide state carried in every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceStateSnapshot {
    pub phase: RacePhase,
    pub countdown_remaining_ms: u64,
    pub lap_count: u32,
    pub elapsed_ms: u64,
}
