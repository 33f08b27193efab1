/// Exponential backoff schedule with optional cap and jitter
use rand::Rng;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Growth factor applied per attempt
    pub multiplier: f64,
    /// Upper bound for any single delay (None = uncapped)
    pub max_delay: Option<Duration>,
    /// Add random jitter to each delay (±30%)
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: None,
            jitter: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackoffError {
    #[error("Backoff multiplier must be >= 1.0, got {0}")]
    InvalidMultiplier(f64),
    #[error("Initial backoff delay must be greater than zero")]
    ZeroDelay,
    #[error("Max delay {max:?} is shorter than initial delay {initial:?}")]
    CapBelowInitial { initial: Duration, max: Duration },
}

impl BackoffConfig {
    /// Reject schedules that would shrink or never wait.
    pub fn validate(&self) -> Result<(), BackoffError> {
        if self.initial_delay.is_zero() {
            return Err(BackoffError::ZeroDelay);
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(BackoffError::InvalidMultiplier(self.multiplier));
        }
        if let Some(max) = self.max_delay {
            if max < self.initial_delay {
                return Err(BackoffError::CapBelowInitial {
                    initial: self.initial_delay,
                    max,
                });
            }
        }
        Ok(())
    }

    /// Delay for the 0-based `attempt`: `initial_delay * multiplier^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.scheduled(attempt);
        if self.jitter {
            apply_jitter(delay)
        } else {
            delay
        }
    }

    /// Largest delay `delay_for(attempt)` can return, jitter included.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let delay = self.scheduled(attempt);
        if self.jitter {
            Duration::from_millis((delay.as_millis() as f64 * (1.0 + JITTER_RATIO)) as u64)
        } else {
            delay
        }
    }

    fn scheduled(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let mut delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if let Some(max) = self.max_delay {
            delay_ms = delay_ms.min(max.as_millis() as f64);
        }

        // `as` saturates, so an overflowing power lands on u64::MAX
        Duration::from_millis(delay_ms as u64)
    }

    /// Stateful iterator over successive delays.
    pub fn iter(&self) -> Backoff {
        Backoff::new(self.clone())
    }
}

/// Stateful walk over a [`BackoffConfig`] schedule.
///
/// Used by loops that retry in place and reset after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.config.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        debug!(attempt = self.attempt, ?delay, "Backoff delay computed");
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_delay())
    }
}

const JITTER_RATIO: f64 = 0.3;

fn apply_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor = 1.0 + rng.gen_range(-JITTER_RATIO..JITTER_RATIO);
    Duration::from_millis((delay.as_millis() as f64 * jitter_factor) as u64)
}
