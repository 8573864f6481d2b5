use std::f32::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

/// Upper bound on a single step's dt (seconds). Callers clamp before calling
/// [`step`]; a stalled tick must not produce a physically absurd jump.
pub const MAX_STEP_DT: f32 = 1.0 / 15.0;

/// Fraction of brake deceleration used to shed speed above the current top
/// speed (e.g. once a boost ends).
const OVERSPEED_SHED_FACTOR: f32 = 0.5;

/// Kinematic state of one car. Owned by whichever side simulates it; only
/// serialized copies cross the network.
///
/// Heading 0 faces +z and forward travel is `(sin yaw, 0, cos yaw)`, so a
/// positive yaw change is a left turn.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionState {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Heading in radians, wrapped to `[-PI, PI)`.
    pub yaw: f32,
    /// Signed scalar speed along the travel direction (m/s).
    pub speed: f32,
    /// Angle between heading and travel direction while drifting.
    pub slip: f32,
    /// Body pitch-bob offset driven by longitudinal acceleration.
    pub suspension_offset: f32,
}

impl MotionState {
    pub fn at(x: f32, y: f32, z: f32, yaw: f32) -> Self {
        Self {
            x,
            y,
            z,
            yaw: wrap_angle(yaw),
            ..Self::default()
        }
    }

    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Direction of travel: heading minus drift slip.
    pub fn travel_heading(&self) -> f32 {
        self.yaw - self.slip
    }

    /// Planar (x, z) velocity vector.
    pub fn planar_velocity(&self) -> (f32, f32) {
        let heading = self.travel_heading();
        (
            libm::sinf(heading) * self.speed,
            libm::cosf(heading) * self.speed,
        )
    }

    /// Euclidean distance between the two positions.
    pub fn distance_to(&self, other: &MotionState) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        libm::sqrtf(dx * dx + dy * dy + dz * dz)
    }

    /// Absolute shortest angular difference between the two headings.
    pub fn yaw_error_to(&self, other: &MotionState) -> f32 {
        libm::fabsf(shortest_angle_delta(self.yaw, other.yaw))
    }
}

/// Discrete control intent for one tick. Immutable once stamped into an
/// input frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlState {
    /// -1 reverse, 0 coast, 1 accelerate, 2 accelerate with cruise sustain.
    pub throttle: i8,
    /// +1 left, -1 right, 0 straight.
    pub steering: i8,
    pub boost: bool,
    pub brake: bool,
    /// Handbrake / precision override: sharper turning with drift slip.
    pub handbrake: bool,
    pub cruise_control: bool,
}

/// Tuning for one vehicle class. Read-only during simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Top forward speed without boost (m/s).
    pub max_forward_speed: f32,
    pub max_reverse_speed: f32,
    pub acceleration: f32,
    pub reverse_acceleration: f32,
    pub brake_deceleration: f32,
    /// Linear drag coefficient (1/s).
    pub drag: f32,
    /// Yaw rate at full steering and full speed (rad/s).
    pub turn_rate: f32,
    pub handbrake_turn_multiplier: f32,
    /// Maximum drift slip angle (rad).
    pub max_slip: f32,
    /// Rate at which slip builds while the handbrake is held (1/s).
    pub slip_rate: f32,
    /// Rate at which slip recovers once released (1/s).
    pub grip: f32,
    /// Top speed and acceleration multiplier while boosting.
    pub boost_multiplier: f32,
    pub suspension_stiffness: f32,
    pub suspension_travel: f32,
}

impl PhysicsConfig {
    pub const BALANCED: PhysicsConfig = PhysicsConfig {
        max_forward_speed: 42.0,
        max_reverse_speed: 12.0,
        acceleration: 18.0,
        reverse_acceleration: 10.0,
        brake_deceleration: 36.0,
        drag: 0.35,
        turn_rate: 2.4,
        handbrake_turn_multiplier: 1.6,
        max_slip: 0.45,
        slip_rate: 3.0,
        grip: 4.0,
        boost_multiplier: 1.35,
        suspension_stiffness: 10.0,
        suspension_travel: 0.12,
    };
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self::BALANCED
    }
}

/// Advance one car by `dt` seconds.
///
/// Total and pure: identical arguments produce bit-identical results on every
/// platform. Trigonometry goes through `libm` so client prediction and the
/// server agree exactly. `dt` is clamped by the caller.
pub fn step(
    state: &MotionState,
    controls: &ControlState,
    dt: f32,
    config: &PhysicsConfig,
) -> MotionState {
    let throttle = controls.throttle.clamp(-1, 2);
    let steering = f32::from(controls.steering.clamp(-1, 1));
    let boost_factor = if controls.boost {
        config.boost_multiplier
    } else {
        1.0
    };
    let top_speed = config.max_forward_speed * boost_factor;

    // Longitudinal
    let mut accel = if controls.brake {
        0.0
    } else if throttle > 0 {
        config.acceleration * boost_factor
    } else if throttle < 0 {
        -config.reverse_acceleration
    } else {
        0.0
    };
    // Cruise sustain (throttle 2) holds speed against drag.
    if throttle < 2 || controls.brake {
        accel -= config.drag * state.speed;
    }

    let mut speed = state.speed + accel * dt;
    if controls.brake {
        let decel = config.brake_deceleration * dt;
        speed = if libm::fabsf(speed) <= decel {
            0.0
        } else if speed > 0.0 {
            speed - decel
        } else {
            speed + decel
        };
    }
    if speed > top_speed {
        // Shed excess gradually instead of popping when boost ends.
        let shed = config.brake_deceleration * OVERSPEED_SHED_FACTOR * dt;
        speed = (state.speed - shed).max(top_speed);
    }
    let speed = speed.clamp(
        -config.max_reverse_speed,
        config.max_forward_speed * config.boost_multiplier,
    );

    // Steering scales with speed and inverts in reverse.
    let speed_factor = (libm::fabsf(speed) / config.max_forward_speed).min(1.0);
    let direction = if speed < 0.0 { -1.0 } else { 1.0 };
    let turn_multiplier = if controls.handbrake {
        config.handbrake_turn_multiplier
    } else {
        1.0
    };
    let yaw = wrap_angle(
        state.yaw + steering * config.turn_rate * turn_multiplier * speed_factor * direction * dt,
    );

    // Drift slip
    let (slip_target, slip_rate) = if controls.handbrake {
        (steering * config.max_slip * speed_factor, config.slip_rate)
    } else {
        (0.0, config.grip)
    };
    let slip = state.slip + (slip_target - state.slip) * (slip_rate * dt).min(1.0);

    // Integrate position along the travel direction.
    let heading = yaw - slip;
    let distance = speed * dt;
    let x = state.x + libm::sinf(heading) * distance;
    let z = state.z + libm::cosf(heading) * distance;

    // Suspension leans against acceleration.
    let longitudinal = if dt > 0.0 {
        (speed - state.speed) / dt
    } else {
        0.0
    };
    let lean = (longitudinal / config.acceleration).clamp(-1.0, 1.0);
    let suspension_target = -lean * config.suspension_travel;
    let suspension_offset = state.suspension_offset
        + (suspension_target - state.suspension_offset)
            * (config.suspension_stiffness * dt).min(1.0);

    MotionState {
        x,
        y: state.y,
        z,
        yaw,
        speed,
        slip,
        suspension_offset,
    }
}

/// Wrap an angle into `[-PI, PI)`.
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    // rem_euclid can round up to TAU for tiny negative remainders.
    if wrapped >= PI { -PI } else { wrapped }
}

/// Signed shortest rotation from `from` to `to`.
pub fn shortest_angle_delta(from: f32, to: f32) -> f32 {
    wrap_angle(to - from)
}

/// Interpolate headings along the shortest arc.
pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    wrap_angle(from + shortest_angle_delta(from, to) * t)
}
