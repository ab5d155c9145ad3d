use async_trait::async_trait;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use chromiumoxide_cdp::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide_cdp::cdp::js_protocol::runtime::{CallArgument, CallFunctionOnParams};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::wrapper::BrowserWrapper;
use crate::BrowserConfig;
use crate::capabilities::{
    BrowserControl, BrowserFactory, CapabilityError, CapabilityResult, DomSnapshot,
};
use crate::utils::constants::NETWORK_QUIET_WINDOW_MS;
use crate::utils::{bounded, clamp_interaction_timeout, clamp_navigation_timeout, wait_for_element};

/// Page-side probe used to decide when the network has gone quiet
const IDLE_PROBE: &str = "({ ready: document.readyState, resources: performance.getEntriesByType('resource').length })";

#[derive(Debug, Deserialize)]
struct IdleProbe {
    ready: String,
    resources: u64,
}

struct Session {
    wrapper: BrowserWrapper,
    page: Page,
}

/// Map a CDP failure onto the capability error classes
///
/// A lost connection or failed launch will not recover within this session;
/// everything else (timeouts, detached nodes, evaluation hiccups) might.
fn cdp_error(operation: &str, e: CdpError) -> CapabilityError {
    let message = format!("{operation} failed: {e}");
    match e {
        CdpError::Ws(_)
        | CdpError::Io(_)
        | CdpError::ChannelSendError(_)
        | CdpError::NoResponse
        | CdpError::LaunchExit(..)
        | CdpError::LaunchTimeout(..)
        | CdpError::LaunchIo(..) => CapabilityError::Permanent(message),
        _ => CapabilityError::Transient(message),
    }
}

/// Chromium-backed [`BrowserControl`], launched lazily on first use
pub struct ChromeBrowser {
    config: BrowserConfig,
    session: Mutex<Option<Session>>,
    closed: AtomicBool,
}

impl ChromeBrowser {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn navigation_timeout(&self) -> Duration {
        clamp_navigation_timeout(self.config.navigation_timeout())
    }

    fn element_timeout(&self) -> Duration {
        clamp_interaction_timeout(self.config.element_timeout())
    }

    /// Current page, launching the browser on first call
    async fn page(&self) -> CapabilityResult<Page> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CapabilityError::Permanent(
                "browser session is closed".to_string(),
            ));
        }

        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.page.clone());
        }

        let mut wrapper = BrowserWrapper::launch(&self.config)
            .await
            .map_err(|e| CapabilityError::Permanent(format!("Failed to launch browser: {e:#}")))?;

        let page = match wrapper.open_blank_page().await {
            Ok(page) => page,
            Err(e) => {
                wrapper.shutdown().await;
                return Err(CapabilityError::Permanent(format!("{e:#}")));
            }
        };

        *guard = Some(Session {
            wrapper,
            page: page.clone(),
        });
        Ok(page)
    }
}

#[async_trait]
impl BrowserControl for ChromeBrowser {
    async fn navigate(&self, url: &str) -> CapabilityResult<()> {
        let page = self.page().await?;
        debug!("Navigating to {}", url);

        bounded("navigation", self.navigation_timeout(), async {
            page.goto(url).await.map_err(|e| cdp_error("navigation", e))?;
            page.wait_for_navigation()
                .await
                .map_err(|e| cdp_error("page load", e))?;
            Ok(())
        })
        .await
    }

    async fn click(&self, selector: &str) -> CapabilityResult<()> {
        let page = self.page().await?;
        let element = wait_for_element(&page, selector, self.element_timeout()).await?;

        element
            .scroll_into_view()
            .await
            .map_err(|e| cdp_error("scroll into view", e))?;

        // Click the computed point directly; element.click() can hang on IntersectionObserver
        let point = element
            .clickable_point()
            .await
            .map_err(|e| cdp_error("clickable point", e))?;
        page.click(point).await.map_err(|e| cdp_error("click", e))?;

        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> CapabilityResult<()> {
        let page = self.page().await?;
        let element = wait_for_element(&page, selector, self.element_timeout()).await?;

        element
            .scroll_into_view()
            .await
            .map_err(|e| cdp_error("scroll into view", e))?;
        let point = element
            .clickable_point()
            .await
            .map_err(|e| cdp_error("clickable point", e))?;
        page.click(point).await.map_err(|e| cdp_error("focus", e))?;

        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(|e| cdp_error("clear field", e))?;

        element
            .type_str(text)
            .await
            .map_err(|e| cdp_error("type text", e))?;

        debug!("Typed {} characters into '{}'", text.chars().count(), selector);
        Ok(())
    }

    async fn scroll_by(&self, dy: i64) -> CapabilityResult<()> {
        let page = self.page().await?;
        let dy = dy.clamp(-10_000, 10_000);

        let call = CallFunctionOnParams::builder()
            .function_declaration("(dy) => window.scrollBy(0, dy)")
            .argument(CallArgument::builder().value(json!(dy)).build())
            .build()
            .map_err(|e| CapabilityError::Permanent(format!("Failed to build scroll params: {e}")))?;

        page.evaluate_function(call)
            .await
            .map_err(|e| cdp_error("scroll", e))?;
        Ok(())
    }

    async fn read_dom(&self) -> CapabilityResult<DomSnapshot> {
        let page = self.page().await?;
        let html = page.content().await.map_err(|e| cdp_error("read DOM", e))?;
        let url = page.url().await.map_err(|e| cdp_error("read URL", e))?;
        Ok(DomSnapshot { url, html })
    }

    async fn screenshot(&self) -> CapabilityResult<Vec<u8>> {
        let page = self.page().await?;
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        page.screenshot(params)
            .await
            .map_err(|e| cdp_error("screenshot", e))
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> CapabilityResult<()> {
        let page = self.page().await?;
        let quiet = Duration::from_millis(NETWORK_QUIET_WINDOW_MS);

        bounded("network idle", timeout, async {
            let mut last_count: Option<u64> = None;
            loop {
                let probe: IdleProbe = page
                    .evaluate(IDLE_PROBE)
                    .await
                    .map_err(|e| cdp_error("network idle probe", e))?
                    .into_value()
                    .map_err(|e| CapabilityError::Transient(format!("Bad idle probe: {e}")))?;

                if probe.ready == "complete" && last_count == Some(probe.resources) {
                    return Ok(());
                }
                last_count = Some(probe.resources);
                tokio::time::sleep(quiet).await;
            }
        })
        .await
    }

    async fn current_url(&self) -> CapabilityResult<Option<String>> {
        let page = {
            let guard = self.session.lock().await;
            match guard.as_ref() {
                Some(session) => session.page.clone(),
                None => return Ok(None),
            }
        };
        page.url().await.map_err(|e| cdp_error("read URL", e))
    }

    async fn close(&self) -> CapabilityResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let session = self.session.lock().await.take();
        if let Some(mut session) = session {
            drop(session.page);
            session.wrapper.shutdown().await;
            info!("Browser session closed");
        }
        Ok(())
    }
}

/// Launches one [`ChromeBrowser`] per run
#[derive(Debug, Clone)]
pub struct ChromeSessionFactory {
    config: BrowserConfig,
}

impl ChromeSessionFactory {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserFactory for ChromeSessionFactory {
    async fn open_session(&self) -> CapabilityResult<Box<dyn BrowserControl>> {
        Ok(Box::new(ChromeBrowser::new(self.config.clone())))
    }
}
