//! Timer-driven status polling.

use crate::config::MonitorConfig;
use crate::hub::BroadcastHub;
use crate::probe::{Probe, ProbeError};
use crate::snapshot::{Metrics, StatusSnapshot};
use crate::utils::{duration_ms, get_timestamp};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Produces one [`StatusSnapshot`] per tick and publishes it to the hub.
///
/// The probe runs inline in the tick loop, so a slow probe delays the next
/// tick instead of overlapping with it.
pub struct Poller<P: Probe> {
    probe: P,
    hub: Arc<BroadcastHub>,
    interval: Duration,
    probe_timeout: Duration,
    server_name: String,
    max_players: u32,
    online_since: Option<Instant>,
    last_timestamp: u64,
}

impl<P: Probe> Poller<P> {
    pub fn new(probe: P, hub: Arc<BroadcastHub>, config: &MonitorConfig) -> Self {
        Self {
            probe,
            hub,
            interval: config.poll_interval,
            probe_timeout: config.probe_timeout,
            server_name: config.server_name.clone(),
            max_players: config.max_players,
            online_since: None,
            last_timestamp: 0,
        }
    }

    /// Runs one probe, publishes the resulting snapshot and returns it.
    ///
    /// Never fails: probe errors end up in the snapshot's `error` field.
    pub async fn poll_once(&mut self) -> Arc<StatusSnapshot> {
        let outcome = match tokio::time::timeout(self.probe_timeout, self.probe.probe()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.probe_timeout)),
        };

        // Wall clocks can step backwards; snapshots must not
        let timestamp = get_timestamp().max(self.last_timestamp);
        self.last_timestamp = timestamp;

        let snapshot = match outcome {
            Ok(report) => {
                let since = match self.online_since {
                    Some(since) => since,
                    None => {
                        info!("{} is online", self.server_name);
                        let now = Instant::now();
                        self.online_since = Some(now);
                        now
                    }
                };
                let metrics = Metrics {
                    ping_ms: duration_ms(report.ping),
                    uptime_seconds: since.elapsed().as_secs(),
                };
                StatusSnapshot::online(
                    self.server_name.as_str(),
                    report.player_count.unwrap_or(0),
                    self.max_players,
                    timestamp,
                    metrics,
                )
            }
            Err(e) => {
                if self.online_since.take().is_some() {
                    warn!("{} went offline: {}", self.server_name, e);
                }
                StatusSnapshot::offline(
                    self.server_name.as_str(),
                    self.max_players,
                    timestamp,
                    e.to_string(),
                )
            }
        };

        let snapshot = Arc::new(snapshot);
        let report = self.hub.publish(Arc::clone(&snapshot));
        debug!(
            "Published snapshot (online: {}, delivered: {}, dropped: {})",
            snapshot.online, report.delivered, report.dropped
        );
        snapshot
    }

    /// Polls on every tick until `shutdown` flips to `true` or its sender is
    /// dropped. The first poll happens immediately.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = self.poll_once() => {}
                _ = shutdown.changed() => break,
            }
        }

        debug!("Poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeReport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probe that sleeps and records how many calls overlap.
    #[derive(Clone, Default)]
    struct InstrumentedProbe {
        delay: Duration,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        started: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Probe for InstrumentedProbe {
        async fn probe(&self) -> Result<ProbeReport, ProbeError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                Err(ProbeError::Connect(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                )))
            } else {
                Ok(ProbeReport {
                    ping: Duration::from_millis(12),
                    player_count: Some(3),
                })
            }
        }
    }

    fn config(poll_ms: u64, timeout_ms: u64) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(poll_ms),
            probe_timeout: Duration::from_millis(timeout_ms),
            server_name: "Isle".into(),
            max_players: 100,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_online_snapshot() {
        let hub = Arc::new(BroadcastHub::new(8));
        let mut subscription = hub.subscribe();
        let mut poller = Poller::new(InstrumentedProbe::default(), Arc::clone(&hub), &config(1000, 500));

        let snapshot = poller.poll_once().await;
        assert!(snapshot.online);
        assert_eq!(snapshot.player_count, 3);
        assert_eq!(snapshot.max_players, 100);
        assert_eq!(snapshot.server_name, "Isle");
        assert_eq!(snapshot.metrics.ping_ms, 12);
        assert!(snapshot.error.is_none());

        assert_eq!(subscription.recv().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_probe_error_becomes_offline_snapshot() {
        let hub = Arc::new(BroadcastHub::new(8));
        let probe = InstrumentedProbe {
            fail: true,
            ..Default::default()
        };
        let mut poller = Poller::new(probe, hub, &config(1000, 500));

        let snapshot = poller.poll_once().await;
        assert!(!snapshot.online);
        assert_eq!(snapshot.player_count, 0);
        assert_eq!(snapshot.metrics, Metrics::default());
        assert!(snapshot.error.as_deref().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn test_hung_probe_times_out() {
        let hub = Arc::new(BroadcastHub::new(8));
        let probe = InstrumentedProbe {
            delay: Duration::from_secs(30),
            ..Default::default()
        };
        let mut poller = Poller::new(probe, hub, &config(1000, 50));

        let snapshot = tokio::time::timeout(Duration::from_secs(2), poller.poll_once())
            .await
            .expect("probe timeout must bound the poll");
        assert!(!snapshot.online);
        assert!(snapshot.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_uptime_resets_after_outage() {
        let hub = Arc::new(BroadcastHub::new(8));
        let mut poller = Poller::new(InstrumentedProbe::default(), hub, &config(1000, 500));

        poller.poll_once().await;
        assert!(poller.online_since.is_some());

        poller.probe.fail = true;
        let offline = poller.poll_once().await;
        assert_eq!(offline.metrics.uptime_seconds, 0);
        assert!(poller.online_since.is_none());

        poller.probe.fail = false;
        let online = poller.poll_once().await;
        assert_eq!(online.metrics.uptime_seconds, 0);
    }

    #[tokio::test]
    async fn test_single_flight_under_slow_probe() {
        let hub = Arc::new(BroadcastHub::new(64));
        let mut subscription = hub.subscribe();
        let probe = InstrumentedProbe {
            delay: Duration::from_millis(60),
            ..Default::default()
        };
        let max_in_flight = Arc::clone(&probe.max_in_flight);
        let started = Arc::clone(&probe.started);

        let poller = Poller::new(probe, Arc::clone(&hub), &config(20, 1000));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(poller.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(400)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("poller should stop")
            .unwrap();

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        // Roughly one probe per 60 ms, never one per 20 ms tick
        let probes = started.load(Ordering::SeqCst);
        assert!(probes >= 2 && probes <= 8, "unexpected probe count {}", probes);

        let mut last = 0;
        while let Some(snapshot) = subscription.try_recv() {
            assert!(snapshot.timestamp_utc >= last);
            last = snapshot.timestamp_utc;
        }
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let hub = Arc::new(BroadcastHub::new(8));
        let poller = Poller::new(InstrumentedProbe::default(), hub, &config(10, 100));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(poller.run(shutdown_rx));

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("poller should stop")
            .unwrap();
    }
}
