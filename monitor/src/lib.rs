//! # Server Status Monitor
//!
//! Keeps an RCON session to a game server alive and turns periodic liveness
//! probes into a stream of immutable status snapshots.
//!
//! ## Module Organization
//!
//! ### Poller Module (`poller`)
//! Timer-driven loop that probes the server once per interval. Polls are
//! single-flight and every failure becomes an `online: false` snapshot.
//!
//! ### Hub Module (`hub`)
//! Bounded per-subscriber queues with non-blocking publish. A subscriber
//! that falls behind is dropped instead of slowing anyone else down.
//!
//! ### Supervisor Module (`supervisor`)
//! Reconnects with exponential backoff and exposes the admin command path.
//!
//! ### Supporting Modules
//! - `probe`: TCP and RCON liveness probes
//! - `snapshot`: the published status record
//! - `backoff`, `config`, `utils`
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::ClientConfig;
//! use monitor::{MonitorConfig, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MonitorConfig::new(ClientConfig::new("127.0.0.1", 27015, "secret"));
//!     let supervisor = Supervisor::start(config)?;
//!
//!     let mut status = supervisor.subscribe();
//!     while let Some(snapshot) = status.recv().await {
//!         println!("online: {}", snapshot.online);
//!     }
//!
//!     supervisor.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod hub;
pub mod poller;
pub mod probe;
pub mod snapshot;
pub mod supervisor;
pub mod utils;

pub use backoff::{Backoff, BackoffConfig};
pub use config::{ConfigError, MonitorConfig};
pub use hub::{BroadcastHub, PublishReport, SubscriberId, Subscription};
pub use poller::Poller;
pub use probe::{Probe, ProbeError, ProbeReport, RconProbe, TcpProbe};
pub use snapshot::{Metrics, StatusSnapshot};
pub use supervisor::{GatewaySlot, Supervisor};
