use serde::Deserialize;

use slipstream_core::collision::BumpConfig;
use slipstream_core::net::protocol::DEFAULT_NETWORK_TICK_HZ;

/// Top-level server configuration, loaded from `slipstream.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Filter used when `RUST_LOG` is unset.
    pub log_level: String,
    pub rooms: RoomsConfig,
    pub bump: BumpConfig,
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            rooms: RoomsConfig::default(),
            bump: BumpConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Infrastructure limits (connection caps, buffer sizes).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Outbound frames queued per player before broadcasts are skipped.
    pub player_message_buffer: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 200,
            player_message_buffer: 256,
        }
    }
}

/// Room and race lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Simulation and snapshot rate.
    pub tick_rate_hz: u32,
    pub max_players: usize,
    /// Players required before the lobby timer runs.
    pub min_players: usize,
    /// Time the lobby waits for more racers once `min_players` is reached.
    pub lobby_wait_ms: u64,
    pub countdown_ms: u64,
    /// Time after the first finisher before the race is closed for everyone.
    pub finish_grace_ms: u64,
    /// Time a finished race stays on screen before the room goes back to the lobby.
    pub post_race_reset_ms: u64,
    /// Queued input frames kept per player; the oldest are dropped first.
    pub input_queue_limit: usize,
    /// Overrides the track's lap count when set.
    pub lap_count: Option<u32>,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: DEFAULT_NETWORK_TICK_HZ,
            max_players: 8,
            min_players: 1,
            lobby_wait_ms: 5000,
            countdown_ms: 3000,
            finish_grace_ms: 30_000,
            post_race_reset_ms: 8000,
            input_queue_limit: 32,
            lap_count: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid listen_addr '{0}'")]
    InvalidListenAddr(String),
    #[error("{0} must be > 0")]
    Zero(&'static str),
    #[error("rooms.min_players ({min}) exceeds rooms.max_players ({max})")]
    PlayerBounds { min: usize, max: usize },
    #[error("bump thresholds must satisfy min <= stun <= flip")]
    BumpThresholds,
}

impl ServerConfig {
    /// Check every field the server cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::InvalidListenAddr(self.listen_addr.clone()));
        }

        let non_zero = [
            ("rooms.tick_rate_hz", self.rooms.tick_rate_hz as usize),
            ("rooms.max_players", self.rooms.max_players),
            ("rooms.min_players", self.rooms.min_players),
            ("rooms.input_queue_limit", self.rooms.input_queue_limit),
            ("limits.max_ws_connections", self.limits.max_ws_connections),
            ("limits.player_message_buffer", self.limits.player_message_buffer),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(name));
        }
        if self.rooms.lap_count == Some(0) {
            return Err(ConfigError::Zero("rooms.lap_count"));
        }
        if self.rooms.min_players > self.rooms.max_players {
            return Err(ConfigError::PlayerBounds {
                min: self.rooms.min_players,
                max: self.rooms.max_players,
            });
        }

        let bump = &self.bump;
        if !(bump.min_impact_speed <= bump.stun_impact_speed
            && bump.stun_impact_speed <= bump.flip_impact_speed)
        {
            return Err(ConfigError::BumpThresholds);
        }
        Ok(())
    }

    /// Load config from `slipstream.toml` (or `SLIPSTREAM_CONFIG`) if it
    /// exists, then apply env var overrides.
    pub fn load() -> Self {
        let path =
            std::env::var("SLIPSTREAM_CONFIG").unwrap_or_else(|_| "slipstream.toml".to_string());
        let mut config = match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!(path = %path, "Loaded configuration");
                    cfg
                },
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Failed to parse config, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!(path = %path, "No config file found, using defaults");
                ServerConfig::default()
            },
        };
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("SLIPSTREAM_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Ok(level) = std::env::var("SLIPSTREAM_LOG_LEVEL")
            && !level.is_empty()
        {
            self.log_level = level;
        }
        if let Ok(val) = std::env::var("SLIPSTREAM_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Ok(val) = std::env::var("SLIPSTREAM_TICK_RATE_HZ")
            && let Ok(n) = val.parse::<u32>()
        {
            self.rooms.tick_rate_hz = n;
        }
        if let Ok(val) = std::env::var("SLIPSTREAM_MAX_PLAYERS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.rooms.max_players = n;
        }
        if let Ok(val) = std::env::var("SLIPSTREAM_LOBBY_WAIT_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.rooms.lobby_wait_ms = n;
        }
        if let Ok(val) = std::env::var("SLIPSTREAM_COUNTDOWN_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.rooms.countdown_ms = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8080");
        assert_eq!(cfg.rooms.tick_rate_hz, 20);
        assert_eq!(cfg.rooms.max_players, 8);
        assert!(cfg.rooms.lap_count.is_none());
        assert_eq!(cfg.limits.player_message_buffer, 256);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
listen_addr = "127.0.0.1:9090"

[rooms]
countdown_ms = 1500
lap_count = 1

[bump]
pair_cooldown_ms = 900
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9090");
        assert_eq!(cfg.rooms.countdown_ms, 1500);
        assert_eq!(cfg.rooms.lap_count, Some(1));
        assert_eq!(cfg.rooms.max_players, 8);
        assert_eq!(cfg.bump.pair_cooldown_ms, 900);
        assert_eq!(cfg.bump.flip_cooldown_ms, 5000);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn validate_rejects_invalid_addr() {
        let cfg = ServerConfig {
            listen_addr: "not-an-address".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidListenAddr(_))
        ));
    }

    #[test]
    fn validate_rejects_zero_tick_rate() {
        let mut cfg = ServerConfig::default();
        cfg.rooms.tick_rate_hz = 0;
        match cfg.validate() {
            Err(ConfigError::Zero(name)) => assert_eq!(name, "rooms.tick_rate_hz"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_inverted_player_bounds() {
        let mut cfg = ServerConfig::default();
        cfg.rooms.min_players = 9;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::PlayerBounds { min: 9, max: 8 })
        ));
    }

    #[test]
    fn validate_rejects_unordered_bump_thresholds() {
        let mut cfg = ServerConfig::default();
        cfg.bump.flip_impact_speed = 1.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::BumpThresholds)));
    }
}
