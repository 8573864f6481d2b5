//! Static game content: vehicles, abilities and tracks.
//!
//! Every lookup is a pure `id -> manifest` function over compiled-in tables.
//! Nothing here is mutated at runtime.

use serde::{Deserialize, Serialize};

use crate::ability::{AbilityDelivery, AbilityManifest, AbilityTarget};
use crate::effects::StatusEffectKind;
use crate::motion::PhysicsConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleManifest {
    pub id: &'static str,
    pub name: &'static str,
    pub physics: PhysicsConfig,
}

pub const DEFAULT_VEHICLE_ID: &str = "balanced";

pub const VEHICLES: &[VehicleManifest] = &[
    VehicleManifest {
        id: "balanced",
        name: "Harbor GT",
        physics: PhysicsConfig::BALANCED,
    },
    VehicleManifest {
        id: "sprinter",
        name: "Needle",
        physics: PhysicsConfig {
            max_forward_speed: 48.0,
            acceleration: 16.0,
            turn_rate: 2.1,
            grip: 3.2,
            ..PhysicsConfig::BALANCED
        },
    },
    VehicleManifest {
        id: "bruiser",
        name: "Breakwater",
        physics: PhysicsConfig {
            max_forward_speed: 38.0,
            acceleration: 21.0,
            brake_deceleration: 42.0,
            turn_rate: 2.6,
            max_slip: 0.35,
            ..PhysicsConfig::BALANCED
        },
    },
];

pub fn vehicle(id: &str) -> Option<&'static VehicleManifest> {
    VEHICLES.iter().find(|v| v.id == id)
}

pub fn vehicle_or_default(id: &str) -> &'static VehicleManifest {
    vehicle(id).unwrap_or(&VEHICLES[0])
}

pub const ABILITIES: &[AbilityManifest] = &[
    AbilityManifest {
        id: "nitro",
        name: "Nitro",
        base_cooldown_ms: 6000,
        max_uses_per_race: f64::INFINITY,
        delivery: AbilityDelivery::Instant {
            effect: StatusEffectKind::Boosted,
            duration_ms: 2000.0,
            target: AbilityTarget::SelfOnly,
        },
    },
    AbilityManifest {
        id: "shock_pulse",
        name: "Shock Pulse",
        base_cooldown_ms: 12_000,
        max_uses_per_race: 3.0,
        delivery: AbilityDelivery::Instant {
            effect: StatusEffectKind::Stunned,
            duration_ms: 900.0,
            target: AbilityTarget::Opponent,
        },
    },
    AbilityManifest {
        id: "homing_missile",
        name: "Homing Missile",
        base_cooldown_ms: 15_000,
        max_uses_per_race: 2.0,
        delivery: AbilityDelivery::Projectile {
            effect: StatusEffectKind::Stunned,
            duration_ms: 1200.0,
            speed: 70.0,
            hit_radius: 2.5,
            lifetime_ms: 4000.0,
            homing: true,
        },
    },
    AbilityManifest {
        id: "oil_bomb",
        name: "Oil Bomb",
        base_cooldown_ms: 10_000,
        max_uses_per_race: f64::INFINITY,
        delivery: AbilityDelivery::Projectile {
            effect: StatusEffectKind::Slowed,
            duration_ms: 2500.0,
            speed: 45.0,
            hit_radius: 3.0,
            lifetime_ms: 2500.0,
            homing: false,
        },
    },
];

pub fn ability(id: &str) -> Option<&'static AbilityManifest> {
    ABILITIES.iter().find(|a| a.id == id)
}

/// Where a car starts. Heading 0 faces +z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnPoint {
    pub x: f32,
    pub z: f32,
    pub yaw: f32,
}

/// Circular gate a car must pass through, in order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Checkpoint {
    pub x: f32,
    pub z: f32,
    pub radius: f32,
}

impl Checkpoint {
    pub fn contains(&self, x: f32, z: f32) -> bool {
        let dx = x - self.x;
        let dz = z - self.z;
        dx * dx + dz * dz <= self.radius * self.radius
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardKind {
    OilSlick,
    SpikeStrip,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HazardManifest {
    pub kind: HazardKind,
    pub x: f32,
    pub z: f32,
    pub radius: f32,
    pub effect: StatusEffectKind,
    pub duration_ms: f32,
}

/// A pickup pad that grants an effect and respawns after a delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerupPadManifest {
    pub x: f32,
    pub z: f32,
    pub radius: f32,
    pub effect: StatusEffectKind,
    pub duration_ms: f32,
    pub respawn_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackManifest {
    pub id: &'static str,
    pub name: &'static str,
    pub lap_count: u32,
    pub spawn_grid: &'static [SpawnPoint],
    /// Index 0 is the start/finish gate.
    pub checkpoints: &'static [Checkpoint],
    pub hazards: &'static [HazardManifest],
    pub powerup_pads: &'static [PowerupPadManifest],
}

impl TrackManifest {
    pub fn spawn_point(&self, slot: usize) -> SpawnPoint {
        self.spawn_grid
            .get(slot % self.spawn_grid.len().max(1))
            .copied()
            .unwrap_or(SpawnPoint {
                x: 0.0,
                z: 0.0,
                yaw: 0.0,
            })
    }
}

const GRID: &[SpawnPoint] = &[
    SpawnPoint { x: -4.0, z: -8.0, yaw: 0.0 },
    SpawnPoint { x: 4.0, z: -8.0, yaw: 0.0 },
    SpawnPoint { x: -4.0, z: -16.0, yaw: 0.0 },
    SpawnPoint { x: 4.0, z: -16.0, yaw: 0.0 },
    SpawnPoint { x: -4.0, z: -24.0, yaw: 0.0 },
    SpawnPoint { x: 4.0, z: -24.0, yaw: 0.0 },
    SpawnPoint { x: -4.0, z: -32.0, yaw: 0.0 },
    SpawnPoint { x: 4.0, z: -32.0, yaw: 0.0 },
];

pub const TRACKS: &[TrackManifest] = &[
    TrackManifest {
        id: "harbor_loop",
        name: "Harbor Loop",
        lap_count: 3,
        spawn_grid: GRID,
        checkpoints: &[
            Checkpoint { x: 0.0, z: 0.0, radius: 12.0 },
            Checkpoint { x: 0.0, z: 120.0, radius: 14.0 },
            Checkpoint { x: 80.0, z: 170.0, radius: 14.0 },
            Checkpoint { x: 160.0, z: 120.0, radius: 14.0 },
            Checkpoint { x: 160.0, z: 0.0, radius: 14.0 },
            Checkpoint { x: 80.0, z: -50.0, radius: 14.0 },
        ],
        hazards: &[
            HazardManifest {
                kind: HazardKind::OilSlick,
                x: 2.0,
                z: 70.0,
                radius: 4.0,
                effect: StatusEffectKind::Slowed,
                duration_ms: 1500.0,
            },
            HazardManifest {
                kind: HazardKind::SpikeStrip,
                x: 160.0,
                z: 60.0,
                radius: 3.0,
                effect: StatusEffectKind::Stunned,
                duration_ms: 600.0,
            },
        ],
        powerup_pads: &[
            PowerupPadManifest {
                x: 120.0,
                z: 150.0,
                radius: 3.0,
                effect: StatusEffectKind::Boosted,
                duration_ms: 1500.0,
                respawn_ms: 8000,
            },
            PowerupPadManifest {
                x: 40.0,
                z: -30.0,
                radius: 3.0,
                effect: StatusEffectKind::Boosted,
                duration_ms: 1500.0,
                respawn_ms: 8000,
            },
        ],
    },
    TrackManifest {
        id: "canyon_sprint",
        name: "Canyon Sprint",
        lap_count: 2,
        spawn_grid: GRID,
        checkpoints: &[
            Checkpoint { x: 0.0, z: 0.0, radius: 12.0 },
            Checkpoint { x: 30.0, z: 200.0, radius: 12.0 },
            Checkpoint { x: 140.0, z: 260.0, radius: 12.0 },
            Checkpoint { x: 220.0, z: 120.0, radius: 12.0 },
            Checkpoint { x: 120.0, z: -60.0, radius: 12.0 },
        ],
        hazards: &[HazardManifest {
            kind: HazardKind::OilSlick,
            x: 90.0,
            z: 235.0,
            radius: 5.0,
            effect: StatusEffectKind::Slowed,
            duration_ms: 2000.0,
        }],
        powerup_pads: &[PowerupPadManifest {
            x: 15.0,
            z: 100.0,
            radius: 3.0,
            effect: StatusEffectKind::Boosted,
            duration_ms: 2000.0,
            respawn_ms: 10_000,
        }],
    },
];

pub fn track(id: &str) -> Option<&'static TrackManifest> {
    TRACKS.iter().find(|t| t.id == id)
}

/// Track chosen for a room seed.
pub fn track_for_seed(seed: u64) -> &'static TrackManifest {
    &TRACKS[(seed % TRACKS.len() as u64) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_vehicle_falls_back_to_default() {
        assert_eq!(vehicle_or_default("hovercraft").id, DEFAULT_VEHICLE_ID);
        assert_eq!(vehicle_or_default("sprinter").physics.max_forward_speed, 48.0);
    }

    #[test]
    fn ability_lookup() {
        let missile = ability("homing_missile").expect("missile exists");
        assert!(missile.max_uses_per_race.is_finite());
        assert!(matches!(missile.delivery, AbilityDelivery::Projectile { homing: true, .. }));
        assert!(!ability("nitro").expect("nitro exists").max_uses_per_race.is_finite());
        assert!(ability("teleport").is_none());
    }

    #[test]
    fn tracks_are_well_formed() {
        for track in TRACKS {
            assert!(track.checkpoints.len() >= 3, "{}", track.id);
            assert!(track.lap_count > 0, "{}", track.id);
            assert!(!track.spawn_grid.is_empty(), "{}", track.id);
            for spawn in track.spawn_grid {
                assert!(spawn.z < track.checkpoints[0].z, "{}", track.id);
            }
        }
    }

    #[test]
    fn seed_selects_track_deterministically() {
        assert_eq!(track_for_seed(0).id, track_for_seed(TRACKS.len() as u64).id);
        assert_eq!(track_for_seed(7).id, track_for_seed(7).id);
        assert_eq!(track_for_seed(9).spawn_point(9), track_for_seed(9).spawn_point(1));
    }
}
