//! Capability seams for the two external systems a run talks to
//!
//! Pipeline steps and the job agent only see these traits. Concrete
//! adapters live in [`gemini`] (LLM over HTTP) and `crate::browser`
//! (Chromium over CDP); tests substitute in-memory fakes.

mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::error::{Classify, ErrorKind};

/// Failure reported by a capability adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// Worth retrying: timeouts, network errors, rate limits, 5xx
    #[error("transient failure: {0}")]
    Transient(String),

    /// Not worth retrying: bad request, auth, exhausted quota, crashed target
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl CapabilityError {
    pub fn timed_out(operation: &str, after: Duration) -> Self {
        CapabilityError::Transient(format!(
            "{} timed out after {}ms",
            operation,
            after.as_millis()
        ))
    }
}

impl Classify for CapabilityError {
    fn kind(&self) -> ErrorKind {
        match self {
            CapabilityError::Transient(_) => ErrorKind::Transient,
            CapabilityError::Permanent(_) => ErrorKind::Permanent,
        }
    }
}

pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Optional context attached to a completion request
#[derive(Debug, Clone, Default)]
pub struct LlmContext {
    /// Structured data serialized next to the prompt
    pub data: Option<Value>,
    /// PNG screenshot for vision-capable models
    pub screenshot_png: Option<Vec<u8>>,
}

impl LlmContext {
    pub fn with_data(data: Value) -> Self {
        Self {
            data: Some(data),
            screenshot_png: None,
        }
    }

    pub fn with_screenshot(png: Vec<u8>) -> Self {
        Self {
            data: None,
            screenshot_png: Some(png),
        }
    }
}

/// Text completion provider
#[async_trait]
pub trait LlmCapability: Send + Sync {
    async fn complete(&self, prompt: &str, context: Option<&LlmContext>) -> CapabilityResult<String>;
}

/// Raw page markup plus the URL it was read from
#[derive(Debug, Clone, Default)]
pub struct DomSnapshot {
    pub url: Option<String>,
    pub html: String,
}

/// One live browser context
///
/// Implementations bound every call with their own timeout and report
/// expiry as [`CapabilityError::Transient`].
#[async_trait]
pub trait BrowserControl: Send + Sync {
    async fn navigate(&self, url: &str) -> CapabilityResult<()>;

    async fn click(&self, selector: &str) -> CapabilityResult<()>;

    /// Type into the element matched by `selector`, replacing its value
    async fn type_text(&self, selector: &str, text: &str) -> CapabilityResult<()>;

    /// Scroll the viewport vertically by `dy` pixels
    async fn scroll_by(&self, dy: i64) -> CapabilityResult<()>;

    async fn read_dom(&self) -> CapabilityResult<DomSnapshot>;

    /// PNG bytes of the visible viewport
    async fn screenshot(&self) -> CapabilityResult<Vec<u8>>;

    async fn wait_for_network_idle(&self, timeout: Duration) -> CapabilityResult<()>;

    async fn current_url(&self) -> CapabilityResult<Option<String>>;

    /// Release the browser. Further calls fail permanently.
    async fn close(&self) -> CapabilityResult<()>;
}

/// Opens a fresh, unshared browser context per call
#[async_trait]
pub trait BrowserFactory: Send + Sync {
    async fn open_session(&self) -> CapabilityResult<Box<dyn BrowserControl>>;
}
