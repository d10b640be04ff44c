//! Reconnect strategies

use std::time::Duration;

use crate::config::SessionConfig;

/// Decides whether and when to try connecting again
pub trait ReconnectStrategy: Send {
    /// Delay before the next attempt, or `None` to give up
    fn next_delay(&mut self) -> Option<Duration>;

    /// Called after a successful connection
    fn reset(&mut self);
}

/// Exponential backoff with optional caps on delay and attempts
#[derive(Debug, Clone, PartialEq)]
pub struct TimedReconnectStrategy {
    min_sleep: Duration,
    sleep_factor: f64,
    max_sleep: Option<Duration>,
    max_attempts: Option<u32>,
    attempts: u32,
    current: Duration,
}

impl TimedReconnectStrategy {
    pub fn new(
        min_sleep: Duration,
        sleep_factor: f64,
        max_sleep: Option<Duration>,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            min_sleep,
            sleep_factor: sleep_factor.max(1.0),
            max_sleep,
            max_attempts,
            attempts: 0,
            current: min_sleep,
        }
    }

    /// Build from session configuration; 0 attempts means unlimited
    pub fn from_config(config: &SessionConfig) -> Self {
        let max_attempts = match config.max_connection_attempts {
            0 => None,
            n => Some(n),
        };
        Self::new(
            config.between_attempts_timeout(),
            config.sleep_factor,
            config.max_sleep(),
            max_attempts,
        )
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl ReconnectStrategy for TimedReconnectStrategy {
    fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            return None;
        }
        self.attempts += 1;

        let delay = match self.max_sleep {
            Some(max) => self.current.min(max),
            None => self.current,
        };
        self.current = delay.mul_f64(self.sleep_factor);
        Some(delay)
    }

    fn reset(&mut self) {
        self.attempts = 0;
        self.current = self.min_sleep;
    }
}
