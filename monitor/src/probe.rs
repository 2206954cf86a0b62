//! Liveness probes run once per poll cycle.

use crate::supervisor::GatewaySlot;
use crate::utils::{count_player_lines, is_unknown_command_reply};
use log::debug;
use std::future::Future;
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;

/// What a successful probe observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    /// Round-trip of the probe itself.
    pub ping: Duration,
    /// Players counted, when the probe can see them.
    pub player_count: Option<u32>,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("connect failed: {0}")]
    Connect(#[from] io::Error),
}

/// A single liveness check against the game server.
pub trait Probe: Send + Sync + 'static {
    fn probe(&self) -> impl Future<Output = Result<ProbeReport, ProbeError>> + Send;
}

/// Connects to the server port and hangs up again.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Probe for TcpProbe {
    async fn probe(&self) -> Result<ProbeReport, ProbeError> {
        let started = Instant::now();
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))??;
        let ping = started.elapsed();
        drop(stream);

        debug!("TCP probe of {} took {:?}", self.address, ping);
        Ok(ProbeReport {
            ping,
            player_count: None,
        })
    }
}

/// Queries the player list over the live RCON gateway.
///
/// Falls back to the TCP probe while no gateway is connected, when no
/// player-list command is configured, or when the query itself fails. A
/// slow player list therefore never marks a reachable server offline.
pub struct RconProbe {
    slot: GatewaySlot,
    command: Option<String>,
    timeout: Duration,
    fallback: TcpProbe,
}

impl RconProbe {
    pub fn new(
        slot: GatewaySlot,
        command: Option<String>,
        timeout: Duration,
        fallback: TcpProbe,
    ) -> Self {
        Self {
            slot,
            command,
            timeout,
            fallback,
        }
    }
}

impl Probe for RconProbe {
    async fn probe(&self) -> Result<ProbeReport, ProbeError> {
        // No live session or nothing to ask: plain reachability only
        let (gateway, command) = match (self.slot.get(), self.command.as_deref()) {
            (Some(gateway), Some(command)) => (gateway, command),
            _ => return self.fallback.probe().await,
        };

        let started = Instant::now();
        let body = match gateway.execute_with_timeout(command, self.timeout).await {
            Ok(body) => body,
            Err(e) => {
                // A failed query says nothing about liveness; ask the port instead
                debug!("Player query failed ({}), falling back to TCP probe", e);
                return self.fallback.probe().await;
            }
        };
        let ping = started.elapsed();

        // The server did not recognise the command, so the body lists nobody
        if is_unknown_command_reply(&body) {
            debug!("Server rejected {:?}, player count unknown", command);
            return Ok(ProbeReport {
                ping,
                player_count: None,
            });
        }

        let players = count_player_lines(&body);
        debug!("RCON probe counted {} players in {:?}", players, ping);
        Ok(ProbeReport {
            ping,
            player_count: Some(players),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::hub::BroadcastHub;
    use crate::poller::Poller;
    use client::fake::FakeServer;
    use client::{ClientConfig, Gateway};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_tcp_probe_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let probe = TcpProbe::new(address, Duration::from_secs(1));
        let report = assert_ok!(probe.probe().await);
        assert_eq!(report.player_count, None);
    }

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        // Grab a free port, then release it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let probe = TcpProbe::new(address, Duration::from_secs(1));
        let err = assert_err!(probe.probe().await);
        assert!(matches!(err, ProbeError::Connect(_) | ProbeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_rcon_probe_counts_players() {
        let handle = FakeServer::new("secret")
            .respond("listplayers", "PlayerA\nPlayerB\n")
            .listen()
            .await
            .unwrap();
        let config = ClientConfig::new("127.0.0.1", handle.port(), "secret");
        let gateway = Gateway::connect(&config).await.unwrap();

        let slot = GatewaySlot::default();
        slot.set(Arc::new(gateway));

        let probe = RconProbe::new(
            slot,
            Some("listplayers".into()),
            Duration::from_secs(1),
            TcpProbe::new(handle.addr().to_string(), Duration::from_secs(1)),
        );
        let report = assert_ok!(probe.probe().await);
        assert_eq!(report.player_count, Some(2));
        handle.stop();
    }

    #[tokio::test]
    async fn test_rcon_probe_falls_back_without_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let probe = RconProbe::new(
            GatewaySlot::default(),
            Some("listplayers".into()),
            Duration::from_secs(1),
            TcpProbe::new(address, Duration::from_secs(1)),
        );
        let report = assert_ok!(probe.probe().await);
        assert_eq!(report.player_count, None);
    }

    #[tokio::test]
    async fn test_unanswered_query_falls_back_to_tcp() {
        let handle = FakeServer::new("secret")
            .silent("listplayers")
            .listen()
            .await
            .unwrap();
        let config = ClientConfig::new("127.0.0.1", handle.port(), "secret");
        let gateway = Arc::new(Gateway::connect(&config).await.unwrap());

        let slot = GatewaySlot::default();
        slot.set(Arc::clone(&gateway));

        let probe = RconProbe::new(
            slot,
            Some("listplayers".into()),
            Duration::from_millis(50),
            TcpProbe::new(handle.addr().to_string(), Duration::from_secs(1)),
        );
        let report = assert_ok!(probe.probe().await);
        assert_eq!(report.player_count, None);
        assert!(gateway.is_authenticated());
        handle.stop();
    }

    #[tokio::test]
    async fn test_silent_player_list_still_reports_online() {
        let handle = FakeServer::new("secret")
            .silent("listplayers")
            .listen()
            .await
            .unwrap();
        let config = ClientConfig::new("127.0.0.1", handle.port(), "secret");
        let gateway = Gateway::connect(&config).await.unwrap();

        let slot = GatewaySlot::default();
        slot.set(Arc::new(gateway));

        let probe = RconProbe::new(
            slot,
            Some("listplayers".into()),
            Duration::from_millis(100),
            TcpProbe::new(handle.addr().to_string(), Duration::from_millis(100)),
        );
        let monitor_config = MonitorConfig {
            probe_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let mut poller = Poller::new(probe, Arc::new(BroadcastHub::new(8)), &monitor_config);

        let snapshot = poller.poll_once().await;
        assert!(snapshot.online);
        assert_eq!(snapshot.player_count, 0);
        assert!(snapshot.error.is_none());
        handle.stop();
    }

    #[tokio::test]
    async fn test_unknown_command_reply_is_not_a_player() {
        // The fake answers unregistered commands with "Unknown command: ..."
        let handle = FakeServer::new("secret").listen().await.unwrap();
        let config = ClientConfig::new("127.0.0.1", handle.port(), "secret");
        let gateway = Gateway::connect(&config).await.unwrap();

        let slot = GatewaySlot::default();
        slot.set(Arc::new(gateway));

        let probe = RconProbe::new(
            slot,
            Some("listplayers".into()),
            Duration::from_secs(1),
            TcpProbe::new(handle.addr().to_string(), Duration::from_secs(1)),
        );
        let report = assert_ok!(probe.probe().await);
        assert_eq!(report.player_count, None);
        handle.stop();
    }
}
