//! Owns the RCON session across reconnects and runs the poller beside it.

use crate::backoff::Backoff;
use crate::config::{ConfigError, MonitorConfig};
use crate::hub::{BroadcastHub, Subscription};
use crate::poller::Poller;
use crate::probe::{RconProbe, TcpProbe};
use crate::snapshot::StatusSnapshot;
use client::{Gateway, RconError};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The currently connected gateway, if any. Shared between the connection
/// task, the probe and admin callers.
#[derive(Clone, Default)]
pub struct GatewaySlot {
    inner: Arc<RwLock<Option<Arc<Gateway>>>>,
}

impl GatewaySlot {
    pub fn get(&self) -> Option<Arc<Gateway>> {
        self.inner.read().clone()
    }

    pub fn set(&self, gateway: Arc<Gateway>) {
        *self.inner.write() = Some(gateway);
    }

    pub fn take(&self) -> Option<Arc<Gateway>> {
        self.inner.write().take()
    }
}

/// Keeps an authenticated session alive and status snapshots flowing.
///
/// Status consumers keep receiving (offline) snapshots through any outage;
/// admin commands fail with [`RconError::NotAuthenticated`] until the
/// session is back.
pub struct Supervisor {
    hub: Arc<BroadcastHub>,
    slot: GatewaySlot,
    auth_failures: Arc<AtomicU32>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    /// Validates `config` and spawns the connection and polling tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: MonitorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let hub = Arc::new(BroadcastHub::new(config.subscriber_capacity));
        let slot = GatewaySlot::default();
        let auth_failures = Arc::new(AtomicU32::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // The player query and its TCP fallback share one probe budget
        let step_timeout = config.probe_timeout / 2;
        let probe = RconProbe::new(
            slot.clone(),
            config.players_command.clone(),
            step_timeout,
            TcpProbe::new(config.probe_address(), step_timeout),
        );
        let poller = Poller::new(probe, Arc::clone(&hub), &config);

        info!(
            "Monitoring {} at {} every {:?}",
            config.server_name,
            config.client.address(),
            config.poll_interval
        );

        let poller_task = tokio::spawn(poller.run(shutdown_rx.clone()));
        let connection_task = tokio::spawn(maintain_connection(
            config,
            slot.clone(),
            Arc::clone(&auth_failures),
            shutdown_rx,
        ));

        Ok(Self {
            hub,
            slot,
            auth_failures,
            shutdown_tx,
            tasks: Mutex::new(vec![poller_task, connection_task]),
        })
    }

    /// Runs an admin command over the live session.
    pub async fn execute(&self, command: &str) -> Result<String, RconError> {
        if command.trim().is_empty() {
            return Err(RconError::InvalidArgument("command is empty".into()));
        }
        let gateway = self.slot.get().ok_or(RconError::NotAuthenticated)?;
        gateway.execute(command).await
    }

    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    pub fn latest(&self) -> Option<Arc<StatusSnapshot>> {
        self.hub.latest()
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn is_connected(&self) -> bool {
        self.slot
            .get()
            .map(|gateway| gateway.is_authenticated())
            .unwrap_or(false)
    }

    /// Authentication failures since the last successful handshake.
    pub fn auth_failures(&self) -> u32 {
        self.auth_failures.load(Ordering::SeqCst)
    }

    /// Stops polling and reconnecting, closes the session and ends every
    /// subscription. Admin commands still in flight resolve with
    /// [`RconError::ConnectionClosed`]. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        info!("Shutting down monitor");
        let _ = self.shutdown_tx.send(true);

        // Both tasks watch the shutdown flag; wait for them to notice
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!("Monitor task panicked: {}", e);
            }
        }

        // The connection task closes its own session, but it may have been
        // between reconnects with a gateway still published
        if let Some(gateway) = self.slot.take() {
            gateway.close().await;
        }
        self.hub.close();
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Connect, wait for the session to die, back off, repeat.
async fn maintain_connection(
    config: MonitorConfig,
    slot: GatewaySlot,
    auth_failures: Arc<AtomicU32>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(config.reconnect.clone());

    loop {
        // Stop requested while we were backing off
        if *shutdown.borrow_and_update() {
            break;
        }

        // Connect and authenticate, unless shutdown wins the race
        let connected = tokio::select! {
            result = Gateway::connect(&config.client) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok(gateway) => {
                info!("RCON connected to {}", config.client.address());

                // A working session resets the retry schedule
                backoff.reset();
                auth_failures.store(0, Ordering::SeqCst);

                // Publish for admin commands and the player probe
                let gateway = Arc::new(gateway);
                slot.set(Arc::clone(&gateway));

                // Park here until the session dies or we are told to stop
                let stopping = tokio::select! {
                    _ = gateway.closed() => false,
                    _ = shutdown.changed() => true,
                };
                slot.take();

                // Deliberate shutdown: fail in-flight commands and leave
                if stopping {
                    gateway.close().await;
                    break;
                }
                warn!("RCON session lost");
            }
            // Keep retrying; the password may be fixed server-side
            Err(RconError::AuthenticationFailed) => {
                let failures = auth_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!("RCON authentication rejected ({} in a row)", failures);
            }
            Err(e) => warn!("RCON connection failed: {}", e),
        }

        // Out of attempts only when max_attempts is set
        let Some(delay) = backoff.next_delay() else {
            error!(
                "Giving up on RCON after {} attempts",
                backoff.attempts()
            );
            break;
        };
        info!(
            "Reconnecting in {:?} (attempt {})",
            delay,
            backoff.attempts()
        );

        // Sleep off the delay, waking early for shutdown
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!("Connection task stopped");
}
