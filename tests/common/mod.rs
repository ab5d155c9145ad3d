//! In-memory stand-ins for the LLM and the browser
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use resume_job_search::agent::AgentSettings;
use resume_job_search::{
    BrowserControl, BrowserFactory, CapabilityError, CapabilityResult, Config, DomSnapshot,
    LlmCapability, LlmContext, ProgressSubscription, SearchEvent,
};

pub const SITE: &str = "https://www.linkedin.com";

/// Config with no pacing, no heartbeats and near-instant retries
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.scraper.min_action_delay_ms = 0;
    config.scraper.action_jitter_ms = 0;
    config.stream.heartbeat_interval_secs = 0;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config
}

pub fn agent_settings() -> AgentSettings {
    AgentSettings::from_config(&test_config())
}

/// Drain a subscription to its end
pub async fn collect(mut subscription: ProgressSubscription) -> Vec<SearchEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.next().await {
        events.push(event);
    }
    events
}

/// Answers every prompt with the same text
pub struct FixedLlm {
    reply: String,
    delay: Duration,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    screenshots: AtomicUsize,
}

impl FixedLlm {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            screenshots: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn screenshots_seen(&self) -> usize {
        self.screenshots.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmCapability for FixedLlm {
    async fn complete(&self, prompt: &str, context: Option<&LlmContext>) -> CapabilityResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        if context.is_some_and(|c| c.screenshot_png.is_some()) {
            self.screenshots.fetch_add(1, Ordering::SeqCst);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.reply.clone())
    }
}

/// Fails every call with the given error
pub struct FailingLlm(pub CapabilityError);

#[async_trait]
impl LlmCapability for FailingLlm {
    async fn complete(&self, _prompt: &str, _context: Option<&LlmContext>) -> CapabilityResult<String> {
        Err(self.0.clone())
    }
}

/// Times out `failures` times (after `delay` each), then answers with `reply`
pub struct FlakyLlm {
    reply: String,
    delay: Duration,
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyLlm {
    pub fn new(reply: impl Into<String>, failures: usize, delay: Duration) -> Self {
        Self {
            reply: reply.into(),
            delay,
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmCapability for FlakyLlm {
    async fn complete(&self, _prompt: &str, _context: Option<&LlmContext>) -> CapabilityResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            tokio::time::sleep(self.delay).await;
            return Err(CapabilityError::timed_out("LLM request", self.delay));
        }
        Ok(self.reply.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Blank,
    Login,
    Landing,
    Results(usize),
}

/// Scripted site: a login form, a post-login landing page and result pages
/// that advance one step per scroll
#[derive(Debug, Clone)]
pub struct BrowserState {
    pub result_pages: Vec<String>,
    pub landing: Option<(String, String)>,
    pub view: View,
    pub current_url: Option<String>,
    pub navigations: Vec<String>,
    pub typed_into: Vec<String>,
    pub clicks: Vec<String>,
    pub scrolls: usize,
    pub closed: bool,
    /// Upcoming navigations that fail with a transient error
    pub failing_navigations: usize,
    pub failed_navigations: usize,
    /// Cancel the token once this many scrolls have happened
    pub cancel_after_scrolls: Option<(usize, CancellationToken)>,
}

impl BrowserState {
    pub fn with_results(result_pages: Vec<String>) -> Self {
        Self {
            result_pages,
            landing: None,
            view: View::Blank,
            current_url: None,
            navigations: Vec::new(),
            typed_into: Vec::new(),
            clicks: Vec::new(),
            scrolls: 0,
            closed: false,
            failing_navigations: 0,
            failed_navigations: 0,
            cancel_after_scrolls: None,
        }
    }

    /// The next `count` navigations time out
    pub fn with_failing_navigations(mut self, count: usize) -> Self {
        self.failing_navigations = count;
        self
    }

    pub fn cancel_after_scrolls(mut self, scrolls: usize, cancel: CancellationToken) -> Self {
        self.cancel_after_scrolls = Some((scrolls, cancel));
        self
    }

    /// Page shown after the login form is submitted
    pub fn with_landing(mut self, url: &str, html: &str) -> Self {
        self.landing = Some((url.to_string(), html.to_string()));
        self
    }
}

pub struct FakeBrowser {
    state: Arc<Mutex<BrowserState>>,
}

impl FakeBrowser {
    pub fn new(state: BrowserState) -> (Self, Arc<Mutex<BrowserState>>) {
        let state = Arc::new(Mutex::new(state));
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }

    fn live(&self) -> CapabilityResult<parking_lot::MutexGuard<'_, BrowserState>> {
        let state = self.state.lock();
        if state.closed {
            return Err(CapabilityError::Permanent("browser closed".into()));
        }
        Ok(state)
    }
}

const LOGIN_FORM: &str = r#"<form><input name="session_key"><input name="session_password" type="password"><button type="submit">Sign in</button></form>"#;

#[async_trait]
impl BrowserControl for FakeBrowser {
    async fn navigate(&self, url: &str) -> CapabilityResult<()> {
        let mut state = self.live()?;
        if state.failing_navigations > 0 {
            state.failing_navigations -= 1;
            state.failed_navigations += 1;
            return Err(CapabilityError::Transient(format!("navigation to {url} timed out")));
        }
        state.navigations.push(url.to_string());
        state.current_url = Some(url.to_string());
        state.view = if url.contains("/login") {
            View::Login
        } else if url.contains("/jobs/search") {
            View::Results(0)
        } else {
            View::Blank
        };
        Ok(())
    }

    async fn click(&self, selector: &str) -> CapabilityResult<()> {
        let mut state = self.live()?;
        state.clicks.push(selector.to_string());
        if state.view == View::Login {
            if let Some((url, _)) = state.landing.clone() {
                state.current_url = Some(url);
                state.view = View::Landing;
            }
        }
        Ok(())
    }

    async fn type_text(&self, selector: &str, _text: &str) -> CapabilityResult<()> {
        self.live()?.typed_into.push(selector.to_string());
        Ok(())
    }

    async fn scroll_by(&self, _dy: i64) -> CapabilityResult<()> {
        let mut state = self.live()?;
        state.scrolls += 1;
        if let Some((after, cancel)) = &state.cancel_after_scrolls {
            if state.scrolls >= *after {
                cancel.cancel();
            }
        }
        if let View::Results(index) = state.view {
            let last = state.result_pages.len().saturating_sub(1);
            state.view = View::Results((index + 1).min(last));
        }
        Ok(())
    }

    async fn read_dom(&self) -> CapabilityResult<DomSnapshot> {
        let state = self.live()?;
        let html = match state.view {
            View::Blank => String::new(),
            View::Login => LOGIN_FORM.to_string(),
            View::Landing => state
                .landing
                .as_ref()
                .map(|(_, html)| html.clone())
                .unwrap_or_default(),
            View::Results(index) => state.result_pages.get(index).cloned().unwrap_or_default(),
        };
        Ok(DomSnapshot {
            url: state.current_url.clone(),
            html,
        })
    }

    async fn screenshot(&self) -> CapabilityResult<Vec<u8>> {
        self.live()?;
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> CapabilityResult<()> {
        self.live()?;
        Ok(())
    }

    async fn current_url(&self) -> CapabilityResult<Option<String>> {
        Ok(self.live()?.current_url.clone())
    }

    async fn close(&self) -> CapabilityResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Hands out a fresh [`FakeBrowser`] per session and keeps their state
pub struct FakeFactory {
    template: BrowserState,
    sessions: Mutex<Vec<Arc<Mutex<BrowserState>>>>,
}

impl FakeFactory {
    pub fn new(template: BrowserState) -> Self {
        Self {
            template,
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn sessions(&self) -> Vec<Arc<Mutex<BrowserState>>> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl BrowserFactory for FakeFactory {
    async fn open_session(&self) -> CapabilityResult<Box<dyn BrowserControl>> {
        let (browser, state) = FakeBrowser::new(self.template.clone());
        self.sessions.lock().push(state);
        Ok(Box::new(browser))
    }
}

/// Structural job card markup
pub fn job_card(id: u32, title: &str, company: &str) -> String {
    format!(
        r#"<li><div class="base-card job-search-card" data-entity-urn="urn:li:jobPosting:{id}">
             <a class="base-card__full-link" href="{SITE}/jobs/view/{id}?refId=r{id}&trackingId=t"></a>
             <h3 class="base-search-card__title">{title}</h3>
             <h4 class="base-search-card__subtitle"><a>{company}</a></h4>
             <span class="job-search-card__location">Remote</span>
           </div></li>"#
    )
}

/// Results page listing `cards`
pub fn results_page(cards: &[String]) -> String {
    format!(
        "<html><body><ul class=\"jobs-search__results-list\">{}</ul></body></html>",
        cards.concat()
    )
}
