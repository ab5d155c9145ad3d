use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::StepError;
use crate::RetrySettings;
use crate::error::Classify;

/// Bounded exponential backoff for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt + 1`, never above `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_ms = self.max_delay.as_millis() as f64;
        let delay = self.base_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt.min(31) as i32);
        let delay = delay.min(max_ms);

        let delay = if self.jitter && delay > 0.0 {
            let spread = delay * 0.1;
            (delay + rand::rng().random_range(-spread..=spread)).clamp(0.0, max_ms)
        } else {
            delay
        };

        Duration::from_millis(delay as u64)
    }

    /// Sleep before the next attempt; `false` when cancelled first
    pub async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> bool {
        let delay = self.delay_for_attempt(attempt);
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Run `operation`, retrying transient failures per `policy`
///
/// Non-retryable failures and exhausted retries surface as [`StepError`].
/// Cancellation during a backoff ends the loop with a cancelled error.
pub async fn retry_transient<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> Result<T, StepError>
where
    E: Classify + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(StepError::cancelled());
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.kind().is_retryable() && attempt < policy.max_retries => {
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying",
                    label,
                    attempt + 1,
                    policy.max_retries + 1,
                    e
                );
                if !policy.backoff(attempt, cancel).await {
                    return Err(StepError::cancelled());
                }
                attempt += 1;
            }
            Err(e) => return Err(StepError::from_classified(&e)),
        }
    }
}
