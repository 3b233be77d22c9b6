//! Reconnect backoff for the market-data subscription
//!
//! Exponential delay with jitter so several processes reconnecting to the same
//! terminal do not hammer it in lockstep. Only the broadcast side reconnects;
//! the command channel never retries.

use rand::Rng;
use std::time::Duration;

/// Backoff policy
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth per attempt (typically 2.0)
    pub multiplier: f64,
    /// None = keep trying forever
    pub max_retries: Option<usize>,
    /// Spread applied around each delay, 0.0 to 1.0
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_retries: None,
            jitter_factor: 0.2,
        }
    }
}

impl BackoffConfig {
    /// Short, bounded schedule for tests and local terminals
    pub fn fast(max_retries: usize) -> Self {
        Self {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            max_retries: Some(max_retries),
            jitter_factor: 0.0,
        }
    }
}

/// Exponential backoff state machine
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: usize,
    current_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            attempt: 0,
            config,
        }
    }

    /// Next delay, or None once the retry budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.config.max_retries {
            if self.attempt >= max {
                return None;
            }
        }

        let delay = self.jittered(self.current_delay);

        self.attempt += 1;
        self.current_delay = Duration::from_secs_f64(
            self.current_delay.as_secs_f64() * self.config.multiplier,
        )
        .min(self.config.max_delay);

        Some(delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen::<f64>() * self.config.jitter_factor;
        let factor = 1.0 + jitter - self.config.jitter_factor / 2.0;
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }

    /// Back to the initial delay after a successful connect
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.config.initial_delay;
    }

    pub fn attempt_number(&self) -> usize {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
