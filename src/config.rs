//! Configuration
//!
//! Everything is read from the environment. Unset keys take their defaults;
//! set but unparseable keys are an error.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::network::auth::AuthConfig;
use crate::network::server::ServerConfig;
use crate::sync::processor::ProcessorConfig;
use crate::sync::turns::TurnDriverConfig;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A key holds a value that does not parse.
    #[error("invalid value {value:?} for {key}")]
    Invalid {
        /// Environment key
        key: &'static str,
        /// Raw value
        value: String,
    },
}

/// Server process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// WebSocket server
    pub server: ServerConfig,
    /// Token validation
    pub auth: AuthConfig,
    /// Action processor
    pub processor: ProcessorConfig,
    /// AI and absent-seat driver
    pub turns: TurnDriverConfig,
    /// Event broadcast buffer per match
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server_defaults = ServerConfig::default();
        let turn_defaults = TurnDriverConfig::default();

        let server = ServerConfig {
            bind_addr: parse(&lookup, "TABLETOP_BIND_ADDR", server_defaults.bind_addr)?,
            max_connections: parse(&lookup, "TABLETOP_MAX_CONNECTIONS", server_defaults.max_connections)?,
            idle_timeout: Duration::from_secs(parse(
                &lookup,
                "TABLETOP_IDLE_TIMEOUT_SECS",
                server_defaults.idle_timeout.as_secs(),
            )?),
            ..server_defaults
        };

        let processor = ProcessorConfig {
            recent_events: parse(&lookup, "TABLETOP_RECENT_EVENTS", ProcessorConfig::default().recent_events)?,
        };

        let turns = TurnDriverConfig {
            ai_move_delay: Duration::from_millis(parse(
                &lookup,
                "TABLETOP_AI_MOVE_DELAY_MS",
                turn_defaults.ai_move_delay.as_millis() as u64,
            )?),
            sweep_interval: Duration::from_secs(parse(
                &lookup,
                "TABLETOP_TURN_SWEEP_SECS",
                turn_defaults.sweep_interval.as_secs(),
            )?),
        };
        if turns.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid { key: "TABLETOP_TURN_SWEEP_SECS", value: "0".into() });
        }

        Ok(Self {
            server,
            auth: AuthConfig::from_lookup(&lookup),
            processor,
            turns,
            event_channel_capacity: parse(&lookup, "TABLETOP_EVENT_CHANNEL_CAPACITY", 256usize)?,
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
