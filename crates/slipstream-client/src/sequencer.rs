use slipstream_core::motion::ControlState;
use slipstream_core::net::messages::InputFrame;
use slipstream_core::net::protocol::PROTOCOL_VERSION;

use crate::input::RawControls;

/// Fraction of max forward speed at which holding up engages the latch.
pub const CRUISE_ENGAGE_RATIO: f32 = 0.98;

/// Left pressed is +1, right pressed is -1, both cancel.
pub fn resolve_steering_input(left: bool, right: bool) -> i8 {
    i8::from(left) - i8::from(right)
}

/// Inputs to one evaluation of the cruise latch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CruiseLatchInput {
    pub previous_latch: bool,
    pub up: bool,
    pub down: bool,
    pub brake: bool,
    pub cruise_enabled: bool,
    pub precision_override: bool,
    pub speed: f32,
    pub max_forward_speed: f32,
}

/// Next state of the cruise latch.
///
/// Releases on disabled cruise, precision override, down or brake. Engages on
/// up held at or above [`CRUISE_ENGAGE_RATIO`] of top speed. Otherwise sticks.
pub fn resolve_cruise_latch(input: &CruiseLatchInput) -> bool {
    if !input.cruise_enabled || input.precision_override || input.down || input.brake {
        return false;
    }
    if input.up && input.speed >= input.max_forward_speed * CRUISE_ENGAGE_RATIO {
        return true;
    }
    input.previous_latch
}

/// Manual throttle plus one unit of sustain while latched.
pub fn resolve_throttle(up: bool, down: bool, latched: bool, precision_override: bool) -> i8 {
    let manual = i8::from(up) - i8::from(down);
    if latched && !precision_override {
        (manual + 1).clamp(-1, 2)
    } else {
        manual
    }
}

/// Turns per-frame raw controls into sequenced [`InputFrame`]s at the fixed
/// network rate.
#[derive(Debug, Clone)]
pub struct InputSequencer {
    interval: f32,
    max_catch_up: u32,
    accumulator: f32,
    next_seq: u32,
    cruise_latch: bool,
}

impl InputSequencer {
    pub fn new(tick_interval: f32, max_catch_up: u32) -> Self {
        Self {
            interval: tick_interval,
            max_catch_up: max_catch_up.max(1),
            accumulator: 0.0,
            next_seq: 1,
            cruise_latch: false,
        }
    }

    /// Feed one render frame's elapsed time and return how many network
    /// ticks are due. Backlog beyond the catch-up limit is dropped.
    pub fn poll(&mut self, frame_dt: f32) -> u32 {
        self.accumulator += frame_dt.max(0.0);
        let due = (self.accumulator / self.interval) as u32;
        let fired = due.min(self.max_catch_up);
        self.accumulator -= fired as f32 * self.interval;
        if due > fired {
            self.accumulator = self.accumulator.min(self.interval);
        }
        fired
    }

    /// Resolve controls and stamp the next frame. Advances the sequence.
    pub fn stamp(
        &mut self,
        raw: &RawControls,
        speed: f32,
        max_forward_speed: f32,
        ack_snapshot_seq: Option<u32>,
        now_ms: u64,
    ) -> InputFrame {
        self.cruise_latch = resolve_cruise_latch(&CruiseLatchInput {
            previous_latch: self.cruise_latch,
            up: raw.up,
            down: raw.down,
            brake: raw.brake,
            cruise_enabled: raw.cruise_enabled,
            precision_override: raw.handbrake,
            speed,
            max_forward_speed,
        });

        let controls = ControlState {
            throttle: resolve_throttle(raw.up, raw.down, self.cruise_latch, raw.handbrake),
            steering: resolve_steering_input(raw.left, raw.right),
            boost: raw.boost,
            brake: raw.brake,
            handbrake: raw.handbrake,
            cruise_control: raw.cruise_enabled,
        };

        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);

        InputFrame {
            seq,
            timestamp_ms: now_ms,
            ack_snapshot_seq,
            controls,
            cruise_control_enabled: raw.cruise_enabled,
            precision_override_active: raw.handbrake,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Seq of the most recently stamped frame (0 before the first).
    pub fn last_seq(&self) -> u32 {
        self.next_seq - 1
    }

    pub fn cruise_latched(&self) -> bool {
        self.cruise_latch
    }

    /// Drop the latch and any pending tick time. The sequence keeps counting.
    pub fn pause(&mut self) {
        self.cruise_latch = false;
        self.accumulator = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latch_input(previous_latch: bool, up: bool, down: bool, speed: f32) -> CruiseLatchInput {
        CruiseLatchInput {
            previous_latch,
            up,
            down,
            brake: false,
            cruise_enabled: true,
            precision_override: false,
            speed,
            max_forward_speed: 40.0,
        }
    }

    #[test]
    fn steering_sign_convention() {
        assert_eq!(resolve_steering_input(true, false), 1);
        assert_eq!(resolve_steering_input(false, true), -1);
        assert_eq!(resolve_steering_input(true, true), 0);
        assert_eq!(resolve_steering_input(false, false), 0);
    }

    #[test]
    fn latch_engages_near_top_speed() {
        assert!(resolve_cruise_latch(&latch_input(false, true, false, 39.5)));
        assert!(!resolve_cruise_latch(&latch_input(false, true, false, 38.9)));
        // Sticky once engaged.
        assert!(resolve_cruise_latch(&latch_input(true, false, false, 20.0)));
    }

    #[test]
    fn down_always_releases() {
        assert!(!resolve_cruise_latch(&latch_input(true, false, true, 40.0)));
        assert!(!resolve_cruise_latch(&latch_input(false, true, true, 40.0)));
    }

    #[test]
    fn brake_releases() {
        let mut input = latch_input(true, false, false, 41.0);
        input.brake = true;
        assert!(!resolve_cruise_latch(&input));
        input.up = true;
        assert!(!resolve_cruise_latch(&input));
    }

    #[test]
    fn braked_car_does_not_drive_off() {
        let mut seq = InputSequencer::new(0.05, 3);
        let cruising = RawControls {
            up: true,
            cruise_enabled: true,
            ..RawControls::default()
        };
        seq.stamp(&cruising, 41.5, 42.0, None, 0);
        assert!(seq.cruise_latched());

        let braking = RawControls {
            brake: true,
            cruise_enabled: true,
            ..RawControls::default()
        };
        let frame = seq.stamp(&braking, 30.0, 42.0, None, 50);
        assert!(!seq.cruise_latched());
        assert_eq!(frame.controls.throttle, 0);

        let idle = RawControls {
            cruise_enabled: true,
            ..RawControls::default()
        };
        let frame = seq.stamp(&idle, 0.0, 42.0, None, 100);
        assert!(!seq.cruise_latched());
        assert_eq!(frame.controls.throttle, 0);
    }

    #[test]
    fn override_or_disable_releases() {
        let mut input = latch_input(true, true, false, 40.0);
        input.precision_override = true;
        assert!(!resolve_cruise_latch(&input));
        input.precision_override = false;
        input.cruise_enabled = false;
        assert!(!resolve_cruise_latch(&input));
    }

    #[test]
    fn latched_throttle_adds_sustain() {
        assert_eq!(resolve_throttle(true, false, true, false), 2);
        assert_eq!(resolve_throttle(false, false, true, false), 1);
        assert_eq!(resolve_throttle(true, false, true, true), 1);
        assert_eq!(resolve_throttle(false, true, false, false), -1);
    }

    #[test]
    fn poll_fires_at_fixed_rate() {
        let mut seq = InputSequencer::new(0.05, 3);
        let mut fired = 0;
        // 60 fps for one second.
        for _ in 0..60 {
            fired += seq.poll(1.0 / 60.0);
        }
        assert!((19..=20).contains(&fired), "fired {fired}");
    }

    #[test]
    fn poll_caps_catch_up_after_stall() {
        let mut seq = InputSequencer::new(0.05, 3);
        assert_eq!(seq.poll(2.0), 3);
        assert!(seq.poll(0.0) <= 1);
    }

    #[test]
    fn stamp_sequences_from_one() {
        let mut seq = InputSequencer::new(0.05, 3);
        assert_eq!(seq.last_seq(), 0);
        let raw = RawControls {
            up: true,
            left: true,
            cruise_enabled: true,
            ..RawControls::default()
        };
        let a = seq.stamp(&raw, 10.0, 42.0, None, 1000);
        let b = seq.stamp(&raw, 41.5, 42.0, Some(4), 1050);
        assert_eq!((a.seq, b.seq), (1, 2));
        assert_eq!(b.ack_snapshot_seq, Some(4));
        assert_eq!(a.controls.throttle, 1);
        assert_eq!(a.controls.steering, 1);
        assert_eq!(b.controls.throttle, 2);
        assert!(seq.cruise_latched());
        assert_eq!(seq.last_seq(), 2);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn down_never_latches(
                previous in any::<bool>(),
                up in any::<bool>(),
                enabled in any::<bool>(),
                speed in -20.0f32..80.0,
            ) {
                let input = CruiseLatchInput {
                    previous_latch: previous,
                    up,
                    down: true,
                    brake: false,
                    cruise_enabled: enabled,
                    precision_override: false,
                    speed,
                    max_forward_speed: 42.0,
                };
                prop_assert!(!resolve_cruise_latch(&input));
            }

            #[test]
            fn throttle_stays_ordinal(
                up in any::<bool>(),
                down in any::<bool>(),
                latched in any::<bool>(),
                precision in any::<bool>(),
            ) {
                let t = resolve_throttle(up, down, latched, precision);
                prop_assert!((-1..=2).contains(&t));
            }
        }
    }
}
