//! Polling lookup for elements rendered after the load event
//!
//! Job boards draw cards and login forms from JavaScript, so one
//! `find_element` right after navigation often misses.

use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::element::Element;

use crate::capabilities::{CapabilityError, CapabilityResult};

const FIRST_POLL: Duration = Duration::from_millis(100);
const MAX_POLL: Duration = Duration::from_secs(1);

/// Poll for `selector` with doubling intervals (100ms up to 1s) until `timeout`
///
/// Still missing at the deadline is transient: the page may not have
/// finished rendering.
pub async fn wait_for_element(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> CapabilityResult<Element> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut interval = FIRST_POLL;

    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Ok(element);
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Err(CapabilityError::Transient(format!(
                "element '{selector}' did not appear within {}ms",
                timeout.as_millis()
            )));
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
        interval = (interval * 2).min(MAX_POLL);
    }
}
