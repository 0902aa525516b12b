//! Exponential backoff for session reconnects
//!
//! Jitter keeps a fleet of bots from hammering the venue in lockstep
//! after an outage.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for the delay between retries
    pub max_delay: Duration,
    /// Growth factor per retry
    pub multiplier: f64,
    /// Randomization factor in `[0, 1]`
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Unbounded exponential backoff; reconnect loops retry until shutdown.
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_delay: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            attempt: 0,
            config,
        }
    }

    /// Next delay, growing toward `max_delay`
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.jittered(self.current_delay);
        self.attempt += 1;
        self.current_delay = std::cmp::min(
            Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.config.multiplier),
            self.config.max_delay,
        );
        delay
    }

    /// Reset after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.config.initial_delay;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor == 0.0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen::<f64>() * self.config.jitter_factor;
        let multiplier = 1.0 + (jitter - self.config.jitter_factor / 2.0);
        Duration::from_secs_f64(delay.as_secs_f64() * multiplier)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
