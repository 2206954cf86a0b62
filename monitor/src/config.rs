//! Settings for the status monitor.

use crate::backoff::BackoffConfig;
use client::{ClientConfig, RconError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("invalid client settings: {0}")]
    Client(#[from] RconError),
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub client: ClientConfig,
    /// Time between poll cycles. Default: 60 s.
    pub poll_interval: Duration,
    /// Bound on each liveness probe. Default: 3 s.
    pub probe_timeout: Duration,
    /// Port for the TCP liveness probe; falls back to the RCON port.
    pub probe_port: Option<u16>,
    /// Command whose non-blank response lines are counted as players.
    pub players_command: Option<String>,
    pub server_name: String,
    pub max_players: u32,
    /// Queue depth per subscriber. Default: 8.
    pub subscriber_capacity: usize,
    pub reconnect: BackoffConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            poll_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(3),
            probe_port: None,
            players_command: None,
            server_name: "Game Server".to_string(),
            max_players: 0,
            subscriber_capacity: 8,
            reconnect: BackoffConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn new(client: ClientConfig) -> Self {
        Self {
            client,
            ..Default::default()
        }
    }

    /// `host:port` the TCP liveness probe connects to.
    pub fn probe_address(&self) -> String {
        format!(
            "{}:{}",
            self.client.host,
            self.probe_port.unwrap_or(self.client.port)
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client.validate()?;

        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval", "must be non-zero"));
        }
        if self.probe_timeout.is_zero() {
            return Err(invalid("probe_timeout", "must be non-zero"));
        }
        if self.subscriber_capacity == 0 {
            return Err(invalid("subscriber_capacity", "must be at least 1"));
        }
        if self.probe_port == Some(0) {
            return Err(invalid("probe_port", "must be non-zero"));
        }
        if let Some(command) = &self.players_command {
            if command.trim().is_empty() {
                return Err(invalid("players_command", "must not be blank"));
            }
        }

        let backoff = &self.reconnect;
        if backoff.initial_delay.is_zero() {
            return Err(invalid("reconnect.initial_delay", "must be non-zero"));
        }
        if backoff.max_delay < backoff.initial_delay {
            return Err(invalid(
                "reconnect.max_delay",
                "must not be below the initial delay",
            ));
        }
        // NaN fails every comparison, so test finiteness first
        if !backoff.multiplier.is_finite() {
            return Err(invalid("reconnect.multiplier", "must be a finite number"));
        }
        if backoff.multiplier < 1.0 {
            return Err(invalid("reconnect.multiplier", "must be at least 1.0"));
        }
        if !(0.0..=1.0).contains(&backoff.jitter) {
            return Err(invalid("reconnect.jitter", "must be between 0.0 and 1.0"));
        }

        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> MonitorConfig {
        MonitorConfig::new(ClientConfig::new("127.0.0.1", 27015, "secret"))
    }

    #[test]
    fn test_defaults_validate() {
        let config = valid();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.probe_timeout, Duration::from_secs(3));
        assert_eq!(config.subscriber_capacity, 8);
    }

    #[test]
    fn test_probe_address_fallback() {
        let mut config = valid();
        assert_eq!(config.probe_address(), "127.0.0.1:27015");

        config.probe_port = Some(7777);
        assert_eq!(config.probe_address(), "127.0.0.1:7777");
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = valid();
        config.poll_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "poll_interval",
                ..
            })
        ));

        let mut config = valid();
        config.reconnect.jitter = 1.5;
        assert!(config.validate().is_err());

        for multiplier in [f64::NAN, f64::INFINITY, 0.5] {
            let mut config = valid();
            config.reconnect.multiplier = multiplier;
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidValue {
                    field: "reconnect.multiplier",
                    ..
                })
            ));
        }

        let mut config = valid();
        config.reconnect.jitter = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.players_command = Some("  ".into());
        assert!(config.validate().is_err());

        let mut config = valid();
        config.client.port = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Client(_))));
    }
}
