//! Connection settings for a single RCON endpoint.

use crate::error::RconError;
use std::time::Duration;

/// Everything needed to open and drive one RCON session.
///
/// Nothing here is baked into the core; binaries fill it from command-line
/// arguments and the environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Bound on the TCP connect itself. Default: 5 s.
    pub connect_timeout: Duration,
    /// Bound on the AUTH handshake. Default: 8 s.
    pub auth_timeout: Duration,
    /// Bound on each `execute` call. Default: 10 s.
    pub command_timeout: Duration,
    /// Largest declared packet size accepted from the server. Default: 1 MiB.
    pub max_frame_size: usize,
    /// Consecutive framing errors tolerated before the session is closed. Default: 3.
    pub max_resync_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 27015,
            password: String::new(),
            connect_timeout: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(8),
            command_timeout: Duration::from_secs(10),
            max_frame_size: protocol::DEFAULT_MAX_FRAME_SIZE,
            max_resync_attempts: 3,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            ..Default::default()
        }
    }

    /// `host:port` string suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), RconError> {
        if self.host.trim().is_empty() {
            return Err(RconError::InvalidArgument("host is empty".into()));
        }
        if self.port == 0 {
            return Err(RconError::InvalidArgument("port must be non-zero".into()));
        }
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("auth_timeout", self.auth_timeout),
            ("command_timeout", self.command_timeout),
        ] {
            if value.is_zero() {
                return Err(RconError::InvalidArgument(format!("{} must be non-zero", name)));
            }
        }
        if self.max_frame_size < protocol::MIN_PACKET_SIZE as usize {
            return Err(RconError::InvalidArgument(format!(
                "max_frame_size {} is below the minimum packet size",
                self.max_frame_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.auth_timeout, Duration::from_secs(8));
        assert_eq!(config.command_timeout, Duration::from_secs(10));
        assert_eq!(config.max_resync_attempts, 3);
    }

    #[test]
    fn test_address_formatting() {
        let config = ClientConfig::new("10.0.0.5", 16007, "secret");
        assert_eq!(config.address(), "10.0.0.5:16007");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ClientConfig::new("", 1, "pw").validate().is_err());
        assert!(ClientConfig::new("localhost", 0, "pw").validate().is_err());

        let mut config = ClientConfig::new("localhost", 27015, "pw");
        config.command_timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(RconError::InvalidArgument(_))
        ));

        let config = ClientConfig::new("localhost", 27015, "pw");
        assert!(config.validate().is_ok());
    }
}
