//! Error classification, backoff and sleeping for generation retries

use crate::config::GenerationConfig;
use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Checked first; a match aborts the provider's remaining attempts
const NON_RETRYABLE_MARKERS: &[&str] = &[
    "unauthorized",
    "invalid_api_key",
    "permission",
    "401",
    "403",
];

const RETRYABLE_MARKERS: &[&str] = &[
    "503",
    "overloaded",
    "rate",
    "quota",
    "unavailable",
    "busy",
    "429",
    "timeout",
    "500",
    "502",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
}

/// Classify an upstream error message by lowercase substring
///
/// Messages matching neither marker set are treated as retryable.
pub fn classify(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if NON_RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return ErrorClass::NonRetryable;
    }
    if !RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        debug!("Unrecognized provider error, retrying: {}", message);
    }
    ErrorClass::Retryable
}

/// Exponential backoff with additive jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(config.base_delay_secs.max(0.0)),
            jitter: Duration::from_secs_f64(config.jitter_secs.max(0.0)),
        }
    }

    /// Delay after failed attempt `retry` (0-indexed): `base * 2^retry + U(0, jitter)`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponential = self.base_delay.saturating_mul(2u32.saturating_pow(retry));
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            self.jitter.mul_f64(rand::thread_rng().gen_range(0.0..1.0))
        };
        exponential.saturating_add(jitter)
    }
}

/// Awaits backoff delays; swapped out in tests
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// One failed provider call
#[derive(Debug, Clone, Serialize)]
pub struct RetryAttempt {
    pub provider: String,
    /// 1-based attempt number within this provider
    pub attempt: u32,
    pub error: String,
    pub class: ErrorClass,
    /// Backoff slept before the next attempt, if one followed
    pub delay: Option<Duration>,
}
