use serde::{Deserialize, Serialize};

use slipstream_core::motion::MAX_STEP_DT;
use slipstream_core::net::protocol::INPUT_FRAME_DT;

/// Client synchronization tunables, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upper bound on one motion step (seconds).
    pub max_step_dt: f32,
    /// Ticks of catch-up allowed after a stalled frame.
    pub max_catch_up_ticks: u32,
    /// Unacknowledged input frames kept for replay.
    pub prediction_history: usize,
    pub correction: CorrectionThresholds,
    /// Duration of a soft visual correction blend.
    pub soft_blend_ms: f32,
    /// How far behind the server clock remote cars are rendered.
    pub interpolation_delay_ms: f64,
    /// Age after which remote samples are evicted.
    pub interpolation_retention_ms: f64,
    pub interpolation_capacity: usize,
    /// Smoothing factor for the server clock offset estimate.
    pub clock_smoothing: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_step_dt: MAX_STEP_DT,
            max_catch_up_ticks: 3,
            prediction_history: 256,
            correction: CorrectionThresholds::default(),
            soft_blend_ms: 150.0,
            interpolation_delay_ms: 100.0,
            interpolation_retention_ms: 1000.0,
            interpolation_capacity: 64,
            clock_smoothing: 0.1,
        }
    }
}

impl ClientConfig {
    /// Load from `SLIPSTREAM_CLIENT_CONFIG`, then `config/client.toml`,
    /// falling back to defaults.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("SLIPSTREAM_CLIENT_CONFIG")
            && let Ok(contents) = std::fs::read_to_string(&path)
            && let Ok(config) = toml::from_str::<Self>(&contents)
        {
            return config;
        }
        if let Ok(contents) = std::fs::read_to_string("config/client.toml")
            && let Ok(config) = toml::from_str::<Self>(&contents)
        {
            return config;
        }
        Self::default()
    }

    /// Seconds per network tick. Fixed by the protocol: every frame is one
    /// motion step of [`INPUT_FRAME_DT`] on both sides.
    pub fn tick_interval(&self) -> f32 {
        INPUT_FRAME_DT
    }
}

/// Error bands for choosing a correction mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionThresholds {
    /// Position error (m) below which the prediction counts as exact.
    pub position_epsilon: f32,
    /// Position error (m) above which the car snaps.
    pub position_hard: f32,
    /// Yaw error (rad) below which the prediction counts as exact.
    pub yaw_epsilon: f32,
    pub yaw_hard: f32,
}

impl Default for CorrectionThresholds {
    fn default() -> Self {
        Self {
            position_epsilon: 0.01,
            position_hard: 4.0,
            yaw_epsilon: 0.01,
            yaw_hard: 0.6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            interpolation_delay_ms = 150.0

            [correction]
            position_hard = 6.0
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.interpolation_delay_ms, 150.0);
        assert_eq!(config.correction.position_hard, 6.0);
        assert_eq!(config.correction.yaw_hard, 0.6);
    }

    #[test]
    fn tick_interval_is_the_frame_step() {
        let config: ClientConfig = toml::from_str(
            r#"
            network_tick_hz = 30
            max_catch_up_ticks = 5
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.max_catch_up_ticks, 5);
        assert_eq!(config.tick_interval(), INPUT_FRAME_DT);
        assert!((config.tick_interval() - 0.05).abs() < 1e-6);
    }
}
