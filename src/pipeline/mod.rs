//! Step pipeline for one search run
//!
//! A pipeline is an ordered list of [`PipelineStep`]s grouped into tracks.
//! Each step moves `pending → running → {done, failed}` exactly once; a
//! failure aborts the remaining steps of its own track only.

mod jobs;
mod profile;
mod retry;
mod runner;

pub use jobs::{Authenticate, JobSearchReport, ScrapeJobs};
pub use profile::{ComposeDocument, ResearchProjects, ResearchSubject};
pub use retry::{RetryPolicy, retry_transient};
pub use runner::{Pipeline, PipelineReport, StepFailure};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{AgentError, AgentSettings, Credentials, JobSearchAgent};
use crate::capabilities::{BrowserFactory, CapabilityError, LlmCapability};
use crate::error::{Classify, ErrorKind};
use crate::progress::{ProgressEvent, ProgressPublisher};
use crate::search::SearchConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Done,
    Failed,
}

/// Independent group of steps; a failure never crosses tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Profile,
    Jobs,
}

impl Track {
    pub fn as_str(self) -> &'static str {
        match self {
            Track::Profile => "profile",
            Track::Jobs => "jobs",
        }
    }

    /// Section heading used in combined documents
    pub fn title(self) -> &'static str {
        match self {
            Track::Profile => "Profile Resume",
            Track::Jobs => "Job Search",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified failure at a step boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Search cancelled")
    }

    pub fn from_classified<E: Classify + fmt::Display>(error: &E) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

impl Classify for StepError {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<AgentError> for StepError {
    fn from(error: AgentError) -> Self {
        Self::from_classified(&error)
    }
}

impl From<CapabilityError> for StepError {
    fn from(error: CapabilityError) -> Self {
        Self::from_classified(&error)
    }
}

/// What a finished step hands back to the runner
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Stored in [`StepOutputs`] under the step name
    pub value: Value,
    /// Summary for the `task_done` event
    pub message: String,
    pub payload: Option<Value>,
}

impl StepOutcome {
    pub fn new(value: Value, message: impl Into<String>) -> Self {
        Self {
            value,
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Append-only map from step name to output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutputs {
    values: BTreeMap<String, Value>,
}

impl StepOutputs {
    pub fn get(&self, step: &str) -> Option<&Value> {
        self.values.get(step)
    }

    pub fn get_str(&self, step: &str) -> Option<&str> {
        self.get(step).and_then(Value::as_str)
    }

    /// Record `value` for `step`; an existing entry is kept and `false` returned
    pub fn insert(&mut self, step: &str, value: Value) -> bool {
        if self.values.contains_key(step) {
            warn!("Output for step {} already recorded, ignoring", step);
            return false;
        }
        self.values.insert(step.to_string(), value);
        true
    }
}

/// Run-scoped resources; the agent's browser session is opened on first use
pub struct RunResources {
    pub llm: Arc<dyn LlmCapability>,
    browsers: Arc<dyn BrowserFactory>,
    agent_settings: AgentSettings,
    credentials: Option<Credentials>,
    agent: Option<JobSearchAgent>,
}

impl RunResources {
    pub fn new(
        llm: Arc<dyn LlmCapability>,
        browsers: Arc<dyn BrowserFactory>,
        agent_settings: AgentSettings,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            llm,
            browsers,
            agent_settings,
            credentials,
            agent: None,
        }
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// The run's agent, opening a browser session the first time
    pub async fn agent(&mut self) -> Result<&mut JobSearchAgent, StepError> {
        if self.agent.is_none() {
            debug!("Opening browser session for this run");
            let browser = self.browsers.open_session().await?;
            let agent = JobSearchAgent::new(browser, self.llm.clone(), self.agent_settings.clone())?;
            self.agent = Some(agent);
        }
        self.agent
            .as_mut()
            .ok_or_else(|| StepError::permanent("browser session unavailable"))
    }

    /// Close the browser session if one was opened
    pub async fn release(&mut self) {
        if let Some(mut agent) = self.agent.take() {
            match agent.close().await {
                Ok(()) => info!("Browser session released"),
                Err(e) => warn!("Failed to close browser session: {}", e),
            }
        }
    }
}

/// Everything a step may touch while it runs
pub struct StepContext<'a> {
    pub step: &'static str,
    pub outputs: &'a StepOutputs,
    pub search: &'a SearchConfig,
    pub cancel: &'a CancellationToken,
    pub retry: &'a RetryPolicy,
    pub resources: &'a mut RunResources,
    progress: &'a ProgressPublisher,
}

impl StepContext<'_> {
    /// Fail fast once the run is cancelled; call before every external call
    pub fn checkpoint(&self) -> Result<(), StepError> {
        if self.cancel.is_cancelled() {
            Err(StepError::cancelled())
        } else {
            Ok(())
        }
    }

    /// Publish a `progress` event for this step
    pub async fn info(&self, message: impl Into<String>) -> Result<(), StepError> {
        self.progress
            .publish(ProgressEvent::progress(self.step, message))
            .await
            .map_err(|_| StepError::cancelled())
    }
}

/// Async unit of work behind a step
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, StepError>;
}

/// Immutable step descriptor
#[derive(Clone)]
pub struct PipelineStep {
    pub name: &'static str,
    pub ordinal: usize,
    pub track: Track,
    pub handler: Arc<dyn StepHandler>,
}

impl fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
            .field("name", &self.name)
            .field("ordinal", &self.ordinal)
            .field("track", &self.track)
            .finish()
    }
}
