//! Exponential reconnect backoff with jitter.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnection attempt. Default: 1 s.
    pub initial_delay: Duration,
    /// Multiplier applied after each failed attempt. Default: 2.0.
    pub multiplier: f64,
    /// Ceiling on any single delay. Default: 30 s.
    pub max_delay: Duration,
    /// Jitter factor (0.0–1.0), applied as ±jitter. Default: 0.1.
    pub jitter: f64,
    /// Attempts before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
            max_attempts: None,
        }
    }
}

/// Tracks attempts since the last success and computes the next delay.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
    current_delay: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let initial = config.initial_delay;
        Self {
            config,
            attempts: 0,
            current_delay: initial,
        }
    }

    /// Next delay, or `None` once `max_attempts` is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.config.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }

        let base = self.current_delay;
        self.attempts = self.attempts.saturating_add(1);

        let jittered = if self.config.jitter > 0.0 {
            let factor = rand::thread_rng()
                .gen_range((1.0 - self.config.jitter)..=(1.0 + self.config.jitter));
            scale(base, factor, self.config.max_delay)
        } else {
            base
        };

        // Grow for next time, pinned at the ceiling once it is reached
        self.current_delay = scale(
            self.current_delay,
            self.config.multiplier,
            self.config.max_delay,
        );

        Some(jittered.min(self.config.max_delay))
    }

    /// Called after a successful reconnection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.config.initial_delay;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// `delay * factor`, capped at `cap`. Values a `Duration` cannot hold
/// (overflow, NaN, negative) saturate to `cap` instead of panicking.
fn scale(delay: Duration, factor: f64, cap: Duration) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
        .map(|scaled| scaled.min(cap))
        .unwrap_or(cap)
}
