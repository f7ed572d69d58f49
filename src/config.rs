//! Server Configuration
//!
//! Every tunable constant consumed by the server lives here. Values come
//! from `Default` or from `CLASH_*` environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Tuning for a single battle.
#[derive(Debug, Clone, PartialEq)]
pub struct BattleConfig {
    /// Interval between ticks.
    pub tick_period: Duration,
    /// Delay between `MatchFound` and the first tick.
    pub start_delay: Duration,
    /// Elixir added to each player per tick.
    pub elixir_per_tick: f64,
    /// Elixir cap.
    pub max_elixir: f64,
    /// Elixir each player starts with.
    pub starting_elixir: f64,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(100), // 10 Hz
            start_delay: Duration::from_millis(500),
            elixir_per_tick: 0.0357, // ~1 elixir every 2.8 s at 10 Hz
            max_elixir: 10.0,
            starting_elixir: 5.0,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum trophy difference for two players to be matched.
    pub trophy_range: i32,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_frame_bytes: usize,
    /// Read deadline, refreshed by every inbound frame.
    pub pong_wait: Duration,
    /// Write deadline for a single frame.
    pub write_wait: Duration,
    /// Interval between server pings. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Interval between stats log lines.
    pub stats_interval: Duration,
    /// Battle tuning.
    pub battle: BattleConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            trophy_range: 100,
            max_frame_bytes: 4096,
            pong_wait,
            write_wait: Duration::from_secs(10),
            ping_period: pong_wait * 9 / 10,
            stats_interval: Duration::from_secs(60),
            battle: BattleConfig::default(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    Invalid {
        /// Environment variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },
    /// Values parse but contradict each other.
    #[error("inconsistent configuration: {0}")]
    Inconsistent(&'static str),
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    ///
    /// `from_env` delegates here; tests pass a map instead of mutating
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "CLASH_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(max) = parse_var(&lookup, "CLASH_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(range) = parse_var(&lookup, "CLASH_TROPHY_RANGE")? {
            config.trophy_range = range;
        }
        if let Some(bytes) = parse_var(&lookup, "CLASH_MAX_FRAME_BYTES")? {
            config.max_frame_bytes = bytes;
        }
        if let Some(secs) = parse_var(&lookup, "CLASH_PONG_WAIT_SECS")? {
            config.pong_wait = Duration::from_secs(secs);
            config.ping_period = config.pong_wait * 9 / 10;
        }
        if let Some(secs) = parse_var(&lookup, "CLASH_WRITE_WAIT_SECS")? {
            config.write_wait = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var(&lookup, "CLASH_TICK_MS")? {
            config.battle.tick_period = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "CLASH_START_DELAY_MS")? {
            config.battle.start_delay = Duration::from_millis(ms);
        }
        if let Some(rate) = parse_var(&lookup, "CLASH_ELIXIR_PER_TICK")? {
            config.battle.elixir_per_tick = rate;
        }
        if let Some(max) = parse_var(&lookup, "CLASH_MAX_ELIXIR")? {
            config.battle.max_elixir = max;
        }
        if let Some(start) = parse_var(&lookup, "CLASH_STARTING_ELIXIR")? {
            config.battle.starting_elixir = start;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that values are mutually consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let battle = &self.battle;
        if battle.tick_period.is_zero() {
            return Err(ConfigError::Inconsistent("tick period must be non-zero"));
        }
        if !battle.max_elixir.is_finite() || battle.max_elixir <= 0.0 {
            return Err(ConfigError::Inconsistent("max elixir must be positive"));
        }
        if !(0.0..=battle.max_elixir).contains(&battle.starting_elixir) {
            return Err(ConfigError::Inconsistent("starting elixir must be within [0, max]"));
        }
        if !battle.elixir_per_tick.is_finite() || battle.elixir_per_tick < 0.0 {
            return Err(ConfigError::Inconsistent("elixir rate must be finite and non-negative"));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Inconsistent("max frame size must be non-zero"));
        }
        if self.ping_period.is_zero() || self.ping_period >= self.pong_wait {
            return Err(ConfigError::Inconsistent("ping period must be shorter than pong wait"));
        }
        if self.trophy_range < 0 {
            return Err(ConfigError::Inconsistent("trophy range must be non-negative"));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
