//! Timeout helpers for browser operations

use std::future::Future;
use std::time::Duration;

use crate::capabilities::{CapabilityError, CapabilityResult};

/// Maximum timeout for browser navigation operations (5 minutes)
/// Covers slow-loading sites, heavy SPAs, and network delays
pub const MAX_NAVIGATION_TIMEOUT_MS: u64 = 300_000;

/// Maximum timeout for element interaction operations (30 seconds)
/// Covers dynamic element loading and animations
pub const MAX_INTERACTION_TIMEOUT_MS: u64 = 30_000;

/// Clamp a configured navigation timeout to [`MAX_NAVIGATION_TIMEOUT_MS`]
pub fn clamp_navigation_timeout(timeout: Duration) -> Duration {
    clamp(timeout, MAX_NAVIGATION_TIMEOUT_MS)
}

/// Clamp a configured interaction timeout to [`MAX_INTERACTION_TIMEOUT_MS`]
pub fn clamp_interaction_timeout(timeout: Duration) -> Duration {
    clamp(timeout, MAX_INTERACTION_TIMEOUT_MS)
}

fn clamp(timeout: Duration, max_ms: u64) -> Duration {
    let max = Duration::from_millis(max_ms);
    if timeout > max {
        tracing::warn!(
            "Timeout {}ms exceeds maximum {}ms, clamping",
            timeout.as_millis(),
            max_ms
        );
        max
    } else {
        timeout
    }
}

/// Run `fut` under `limit`; expiry becomes a transient failure naming `operation`
pub async fn bounded<T, F>(operation: &str, limit: Duration, fut: F) -> CapabilityResult<T>
where
    F: Future<Output = CapabilityResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CapabilityError::timed_out(operation, limit)),
    }
}
