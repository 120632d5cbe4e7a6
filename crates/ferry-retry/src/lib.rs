//! Retry strategies and backoff policies for release registry calls.
//!
//! This crate provides configurable retry strategies with support for:
//! - Multiple backoff strategies (immediate, exponential, linear, constant)
//! - Jitter for avoiding thundering herd problems
//! - Transient vs. permanent error classification (only transient errors are retried)
//! - A cancellable executor that never starts a new attempt once asked to stop
//!
//! # Example
//!
//! ```
//! use ferry_retry::{RetryPolicy, RetryStrategyConfig, calculate_delay};
//! use std::time::Duration;
//!
//! // Use a predefined policy
//! let config = RetryPolicy::Default.to_config();
//! let delay = calculate_delay(&config, 2);
//! println!("Retry after: {:?}", delay);
//!
//! // Custom configuration
//! let custom = RetryStrategyConfig {
//!     max_attempts: 5,
//!     base_delay: Duration::from_secs(1),
//!     max_delay: Duration::from_secs(30),
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy type for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// No delay between retries - retry immediately
    Immediate,
    /// Exponential backoff: delay doubles each attempt (default)
    #[default]
    Exponential,
    /// Linear backoff: delay increases linearly each attempt
    Linear,
    /// Constant delay: same delay every attempt
    Constant,
}

/// Predefined retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Three attempts with short exponential backoff
    #[default]
    Default,
    /// More attempts, faster recovery
    Aggressive,
    /// Fewer attempts, longer delays
    Conservative,
    /// Fully custom configuration via `[retry]` settings
    Custom,
}

impl RetryPolicy {
    /// Get the retry configuration for this policy.
    pub fn to_config(&self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::Default => RetryStrategyConfig::default(),
            RetryPolicy::Aggressive => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 6,
                base_delay: Duration::from_millis(250),
                max_delay: Duration::from_secs(10),
                jitter: 0.3,
            },
            RetryPolicy::Conservative => RetryStrategyConfig {
                strategy: RetryStrategyType::Linear,
                max_attempts: 2,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(30),
                jitter: 0.1,
            },
            // Custom uses the explicitly configured values
            RetryPolicy::Custom => RetryStrategyConfig::default(),
        }
    }
}

/// Configuration for a retry strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    /// Strategy type for calculating delay between retries.
    #[serde(default)]
    pub strategy: RetryStrategyType,
    /// Maximum number of attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for backoff calculations.
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Maximum delay cap for backoff.
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor for randomized delays (0.0 = no jitter, 1.0 = full jitter).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(8)
}

fn default_jitter() -> f64 {
    0.5
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategyType::Exponential,
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

/// Error classification for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient failure (timeout, connection reset, 5xx, 429); retried
    #[default]
    Retryable,
    /// Definitive rejection (4xx, validation); never retried
    Permanent,
}

/// Errors that know whether retrying them can help.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Calculate the delay for the next retry attempt based on the strategy configuration.
///
/// `attempt` is the attempt that just failed (1-indexed).
///
/// ```
/// use ferry_retry::{RetryStrategyConfig, RetryStrategyType, calculate_delay};
/// use std::time::Duration;
///
/// let config = RetryStrategyConfig {
///     strategy: RetryStrategyType::Exponential,
///     base_delay: Duration::from_secs(1),
///     max_delay: Duration::from_secs(60),
///     jitter: 0.0,
///     max_attempts: 10,
/// };
///
/// assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
/// assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
/// ```
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt),
        RetryStrategyType::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);

    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

/// Jitter factor of 0.5 means delay * (0.5 to 1.5).
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    let jitter = jitter.clamp(0.0, 1.0);
    let random_value: f64 = rand::random();
    let random_factor = 1.0 - jitter + (random_value * 2.0 * jitter);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

/// Result of an operation driven by [`RetryExecutor`], tagged with the
/// number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Runs a fallible operation with the configured retry behavior.
pub struct RetryExecutor {
    config: RetryStrategyConfig,
    sleep: fn(Duration),
}

impl RetryExecutor {
    pub fn new(config: RetryStrategyConfig) -> Self {
        Self {
            config,
            sleep: std::thread::sleep,
        }
    }

    /// Replace the function used to wait between attempts.
    pub fn with_sleeper(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    /// Execute `operation`, retrying only [`ErrorClass::Retryable`] errors.
    ///
    /// `should_stop` is consulted before every retry (after the backoff delay);
    /// once it returns `true` no further attempt is started and the last error
    /// is returned. An attempt that is already running is never interrupted.
    pub fn run_classified<T, E, F, S>(
        &self,
        should_stop: S,
        mut operation: F,
    ) -> Result<Attempted<T>, Attempted<E>>
    where
        E: Classify,
        F: FnMut(u32) -> Result<T, E>,
        S: Fn() -> bool,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt) {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    let exhausted = attempt >= max_attempts;
                    if exhausted || e.class() == ErrorClass::Permanent || should_stop() {
                        return Err(Attempted {
                            value: e,
                            attempts: attempt,
                        });
                    }

                    (self.sleep)(calculate_delay(&self.config, attempt));
                    if should_stop() {
                        return Err(Attempted {
                            value: e,
                            attempts: attempt,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }
}
