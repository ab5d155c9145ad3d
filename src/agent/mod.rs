//! Browser automation agent for the job site
//!
//! One [`JobSearchAgent`] owns one browser session for the lifetime of a
//! run: it logs in, scrapes job cards through a selector fallback chain, and
//! executes free-form instructions interpreted by the LLM.

mod actions;
mod auth;
mod scrape;
mod selectors;

pub use actions::{BrowserAction, parse_action};
pub use auth::{LoginOutcome, classify_login};
pub use scrape::{JobQuery, JobRecord, build_search_url, detect_block};
pub use selectors::{SelectorChain, StrategyKind};

use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::Config;
use crate::capabilities::{BrowserControl, CapabilityError, LlmCapability};
use crate::error::{Classify, ErrorKind};

/// Error type for agent operations
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Browser error: {0}")]
    Browser(CapabilityError),

    #[error("LLM error: {0}")]
    Llm(CapabilityError),

    #[error("Login blocked by a security challenge: {0}")]
    AuthChallenge(String),

    #[error("Login rejected: invalid credentials")]
    InvalidCredentials,

    #[error("Authenticated search requested but the session is not logged in")]
    NotAuthenticated,

    #[error("Access blocked by the site: {0}")]
    Blocked(String),

    #[error("Agent session is closed")]
    Closed,

    #[error("Agent stopped")]
    Cancelled,

    #[error("Invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    #[error("Could not interpret action: {0}")]
    InvalidAction(String),

    #[error("Invalid agent configuration: {0}")]
    Config(String),
}

impl Classify for AgentError {
    fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Browser(e) | AgentError::Llm(e) => e.kind(),
            AgentError::Cancelled => ErrorKind::Cancelled,
            AgentError::AuthChallenge(_)
            | AgentError::InvalidCredentials
            | AgentError::NotAuthenticated
            | AgentError::Blocked(_)
            | AgentError::Closed
            | AgentError::Selector { .. }
            | AgentError::InvalidAction(_)
            | AgentError::Config(_) => ErrorKind::Permanent,
        }
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Job site login. Values never appear in logs, errors or events.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read `LINKEDIN_USERNAME` / `LINKEDIN_PASSWORD`; `None` unless both are set
    pub fn from_env() -> Option<Self> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|value| !value.trim().is_empty())
        };
        Some(Self::new(read("LINKEDIN_USERNAME")?, read("LINKEDIN_PASSWORD")?))
    }

    pub(crate) fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Session lifecycle: uninitialized → session_open → {authenticated, anonymous} → closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    SessionOpen,
    Authenticated,
    Anonymous,
    Closed,
}

/// Pacing and termination knobs, usually derived from [`Config`]
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub site_base_url: String,
    pub min_action_delay: Duration,
    pub action_jitter: Duration,
    pub stagnation_limit: u32,
    pub max_scroll_attempts: u32,
    pub scroll_step_px: i64,
    pub network_idle_timeout: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            site_base_url: config.scraper.site_base_url.clone(),
            min_action_delay: Duration::from_millis(config.scraper.min_action_delay_ms),
            action_jitter: Duration::from_millis(config.scraper.action_jitter_ms),
            stagnation_limit: config.scraper.stagnation_limit.max(1),
            max_scroll_attempts: config.scraper.max_scroll_attempts,
            scroll_step_px: config.scraper.scroll_step_px,
            network_idle_timeout: config.browser.network_idle_timeout(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct JobSearchAgent {
    browser: Box<dyn BrowserControl>,
    llm: Arc<dyn LlmCapability>,
    settings: AgentSettings,
    selectors: SelectorChain,
    base_url: Url,
    state: SessionState,
    last_url: Option<String>,
}

impl JobSearchAgent {
    pub fn new(
        browser: Box<dyn BrowserControl>,
        llm: Arc<dyn LlmCapability>,
        settings: AgentSettings,
    ) -> AgentResult<Self> {
        let base_url = Url::parse(&settings.site_base_url)
            .map_err(|e| AgentError::Config(format!("site_base_url: {e}")))?;

        Ok(Self {
            browser,
            llm,
            selectors: SelectorChain::job_cards()?,
            settings,
            base_url,
            state: SessionState::Uninitialized,
            last_url: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Last URL this agent navigated to or read
    pub fn last_url(&self) -> Option<&str> {
        self.last_url.as_deref()
    }

    /// Close the browser session; later calls fail with [`AgentError::Closed`]
    pub async fn close(&mut self) -> AgentResult<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        self.browser.close().await.map_err(AgentError::Browser)?;
        info!("Agent session closed");
        Ok(())
    }

    fn ensure_usable(&mut self) -> AgentResult<()> {
        match self.state {
            SessionState::Closed => Err(AgentError::Closed),
            SessionState::Uninitialized => {
                self.state = SessionState::SessionOpen;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Human-like delay before every navigation or scroll
    async fn pace(&self) {
        let jitter_ms = self.settings.action_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        let delay = self.settings.min_action_delay + jitter;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Navigate and let the page settle
    async fn goto(&mut self, url: &Url) -> AgentResult<()> {
        debug!("Agent navigating to {}", url);
        self.browser
            .navigate(url.as_str())
            .await
            .map_err(AgentError::Browser)?;
        self.last_url = Some(url.to_string());
        self.settle().await
    }

    /// Wait for network idle; a page that never goes quiet is not an error
    async fn settle(&self) -> AgentResult<()> {
        match self
            .browser
            .wait_for_network_idle(self.settings.network_idle_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(CapabilityError::Transient(reason)) => {
                debug!("Network did not go idle, continuing: {}", reason);
                Ok(())
            }
            Err(e) => {
                warn!("Browser failed while waiting for network idle: {}", e);
                Err(AgentError::Browser(e))
            }
        }
    }
}
