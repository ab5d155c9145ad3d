//! Resume generation and job search engine
//!
//! Runs profile-resume and job-search pipelines against an LLM and a stealth
//! Chromium agent, streaming progress to the caller through a bounded channel.

pub mod agent;
mod browser;
pub mod browser_setup;
pub mod capabilities;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod search;
mod utils;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable pointing at an alternative config file
pub const CONFIG_PATH_ENV: &str = "SEARCH_ENGINE_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub scraper: ScraperConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub retry: RetrySettings,
}

/// LLM provider settings. The API key is read from `GEMINI_API_KEY` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Overridden by `GEMINI_MODEL` when set
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

/// Browser security and launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Disable web security features (Same-Origin Policy, etc.)
    /// WARNING: Only enable for trusted content
    #[serde(default = "default_disable_security")]
    pub disable_security: bool,

    /// Window dimensions
    #[serde(default)]
    pub window: WindowConfig,

    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,

    #[serde(default = "default_network_idle_timeout_ms")]
    pub network_idle_timeout_ms: u64,

    #[serde(default = "default_element_timeout_ms")]
    pub element_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

/// Pacing and termination knobs for the job scraper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Site root used for login, search and relative job links
    #[serde(default = "default_site_base_url")]
    pub site_base_url: String,

    /// Minimum delay before every navigation or scroll
    #[serde(default = "default_min_action_delay_ms")]
    pub min_action_delay_ms: u64,

    /// Upper bound of the random delay added on top of the minimum
    #[serde(default = "default_action_jitter_ms")]
    pub action_jitter_ms: u64,

    /// Consecutive scrolls without new records before giving up
    #[serde(default = "default_stagnation_limit")]
    pub stagnation_limit: u32,

    #[serde(default = "default_max_scroll_attempts")]
    pub max_scroll_attempts: u32,

    #[serde(default = "default_scroll_step_px")]
    pub scroll_step_px: i64,
}

/// Progress stream tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Consumer-side inactivity limit; heartbeats do not count as activity
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

/// Retry bounds for transient failures inside a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_model() -> String {
    "gemini-2.0-flash-exp".to_string()
}
fn default_temperature() -> f64 {
    0.4
}
fn default_max_output_tokens() -> u32 {
    4096
}
fn default_llm_timeout_secs() -> u64 {
    120
}

fn default_headless() -> bool {
    true
}

fn default_disable_security() -> bool {
    false // SECURE BY DEFAULT
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}
fn default_network_idle_timeout_ms() -> u64 {
    15_000
}
fn default_element_timeout_ms() -> u64 {
    5_000
}

fn default_site_base_url() -> String {
    "https://www.linkedin.com".to_string()
}
fn default_min_action_delay_ms() -> u64 {
    1_500
}
fn default_action_jitter_ms() -> u64 {
    750
}
fn default_stagnation_limit() -> u32 {
    3
}
fn default_max_scroll_attempts() -> u32 {
    10
}
fn default_scroll_step_px() -> i64 {
    1_200
}

fn default_channel_capacity() -> usize {
    32
}
fn default_heartbeat_interval_secs() -> u64 {
    15
}
fn default_idle_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            disable_security: default_disable_security(),
            window: WindowConfig::default(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            network_idle_timeout_ms: default_network_idle_timeout_ms(),
            element_timeout_ms: default_element_timeout_ms(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            site_base_url: default_site_base_url(),
            min_action_delay_ms: default_min_action_delay_ms(),
            action_jitter_ms: default_action_jitter_ms(),
            stagnation_limit: default_stagnation_limit(),
            max_scroll_attempts: default_max_scroll_attempts(),
            scroll_step_px: default_scroll_step_px(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl StreamConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn network_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.network_idle_timeout_ms)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }
}

/// Load config from `$SEARCH_ENGINE_CONFIG`, else config.yaml in package root
///
/// Missing files yield defaults. `GEMINI_MODEL` overrides the configured model.
pub fn load_yaml_config() -> anyhow::Result<Config> {
    let config_path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.yaml"));

    let mut config = if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        serde_yaml::from_str::<Config>(&contents)?
    } else {
        Config::default()
    };

    if let Ok(model) = std::env::var("GEMINI_MODEL")
        && !model.trim().is_empty()
    {
        config.llm.model = model.trim().to_string();
    }

    Ok(config)
}

pub use agent::{AgentError, AgentResult, Credentials, JobQuery, JobRecord, JobSearchAgent};
pub use browser::{BrowserWrapper, ChromeBrowser, ChromeSessionFactory};
pub use capabilities::{
    BrowserControl, BrowserFactory, CapabilityError, CapabilityResult, DomSnapshot,
    GeminiClient, LlmCapability, LlmContext,
};
pub use error::{Classify, ErrorKind};
pub use progress::{
    EventKind, ProgressEvent, ProgressSubscription, ResultOutput, SearchEvent, TerminalResult,
    TerminalStatus,
};
pub use search::{
    OutputFormat, SearchConfig, SearchKind, SearchOrchestrator, SearchRequest, SearchType,
    ValidationError,
};
