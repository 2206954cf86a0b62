//! Immutable status snapshots handed to subscribers.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// Probe round-trip in milliseconds; 0 when offline.
    pub ping_ms: u64,
    /// Length of the current online streak; 0 when offline.
    pub uptime_seconds: u64,
}

/// Result of one poll cycle.
///
/// Every field is always present, so consumers see a structurally complete
/// record even during an outage. Shared as `Arc<StatusSnapshot>` and never
/// mutated after publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub server_name: String,
    pub online: bool,
    pub player_count: u32,
    pub max_players: u32,
    /// Milliseconds since the UNIX epoch (UTC).
    pub timestamp_utc: u64,
    pub metrics: Metrics,
    pub error: Option<String>,
}

impl StatusSnapshot {
    pub fn online(
        server_name: impl Into<String>,
        player_count: u32,
        max_players: u32,
        timestamp_utc: u64,
        metrics: Metrics,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            online: true,
            player_count,
            max_players,
            timestamp_utc,
            metrics,
            error: None,
        }
    }

    pub fn offline(
        server_name: impl Into<String>,
        max_players: u32,
        timestamp_utc: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            online: false,
            player_count: 0,
            max_players,
            timestamp_utc,
            metrics: Metrics::default(),
            error: Some(error.into()),
        }
    }
}
