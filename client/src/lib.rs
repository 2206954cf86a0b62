//! # RCON Client Library
//!
//! Client side of the binary remote-console protocol used to administer a
//! game server. It turns "send a command, await the answer" into a
//! correlated, concurrency-safe async call over a single TCP connection.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! Owns one transport connection:
//! - AUTH handshake with a bounded timeout
//! - Request id allocation and the pending-request table
//! - A dedicated read loop that matches responses to requests by id
//! - Resolution of every waiter when the connection closes
//!
//! ### Gateway Module (`gateway`)
//! Thin public facade (`connect`, `execute`, `close`) that validates commands
//! and applies the configured command timeout. Admin tooling calls into this.
//!
//! ### Config and Error Modules (`config`, `error`)
//! Externally supplied connection settings and the typed error taxonomy.
//!
//! ### Fake Module (`fake`)
//! A scripted fake RCON server for tests and local experiments.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::{ClientConfig, Gateway};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("127.0.0.1", 27015, "secret");
//!     let gateway = Gateway::connect(&config).await?;
//!
//!     let players = gateway.execute("listplayers").await?;
//!     println!("{}", players);
//!
//!     gateway.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fake;
pub mod gateway;
pub mod session;

pub use config::ClientConfig;
pub use error::{ErrorKind, RconError};
pub use gateway::Gateway;
pub use session::{Session, SessionState, SessionStats};
