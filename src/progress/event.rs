use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;
use crate::search::OutputFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Run start (no task) or a step entering `running` (with task)
    Started,
    /// Informational message from a running step
    Progress,
    TaskDone,
    Error,
    Heartbeat,
}

/// One progress notification for the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    fn new(kind: EventKind) -> Self {
        Self {
            kind,
            task: None,
            message: None,
            payload: None,
            error_kind: None,
            timestamp: Utc::now(),
        }
    }

    pub fn run_started(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(EventKind::Started)
        }
    }

    pub fn step_started(task: &str) -> Self {
        Self {
            task: Some(task.to_string()),
            message: Some(format!("Running {task}")),
            ..Self::new(EventKind::Started)
        }
    }

    pub fn progress(task: &str, message: impl Into<String>) -> Self {
        Self {
            task: Some(task.to_string()),
            message: Some(message.into()),
            ..Self::new(EventKind::Progress)
        }
    }

    pub fn task_done(task: &str, message: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            task: Some(task.to_string()),
            message: Some(message.into()),
            payload,
            ..Self::new(EventKind::TaskDone)
        }
    }

    pub fn error(task: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            task: Some(task.to_string()),
            message: Some(message.into()),
            error_kind: Some(kind),
            ..Self::new(EventKind::Error)
        }
    }

    pub fn heartbeat() -> Self {
        Self::new(EventKind::Heartbeat)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind == EventKind::Heartbeat
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Completed,
    Error,
}

/// Final document: markdown/plain text or structured JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultOutput {
    Text(String),
    Data(Value),
}

impl ResultOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResultOutput::Text(text) => Some(text),
            ResultOutput::Data(_) => None,
        }
    }

    pub fn as_data(&self) -> Option<&Value> {
        match self {
            ResultOutput::Data(value) => Some(value),
            ResultOutput::Text(_) => None,
        }
    }
}

/// The last event of every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalResult {
    pub status: TerminalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ResultOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub timestamp: DateTime<Utc>,
}

impl TerminalResult {
    pub fn completed(output: ResultOutput, message: Option<String>) -> Self {
        Self {
            status: TerminalStatus::Completed,
            output: Some(output),
            output_format: None,
            message,
            error_kind: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: TerminalStatus::Error,
            output: None,
            output_format: None,
            message: Some(message.into()),
            error_kind: Some(kind),
            timestamp: Utc::now(),
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == TerminalStatus::Completed
    }
}

/// Item yielded by a [`super::ProgressSubscription`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchEvent {
    Progress(ProgressEvent),
    Terminal(TerminalResult),
}

impl SearchEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SearchEvent::Terminal(_))
    }

    /// Event name used when framing the stream as text/event-stream
    pub fn event_name(&self) -> &'static str {
        match self {
            SearchEvent::Progress(p) if p.is_heartbeat() => "ping",
            SearchEvent::Progress(_) => "progress_update",
            SearchEvent::Terminal(_) => "result",
        }
    }

    pub fn as_progress(&self) -> Option<&ProgressEvent> {
        match self {
            SearchEvent::Progress(p) => Some(p),
            SearchEvent::Terminal(_) => None,
        }
    }

    pub fn as_terminal(&self) -> Option<&TerminalResult> {
        match self {
            SearchEvent::Terminal(t) => Some(t),
            SearchEvent::Progress(_) => None,
        }
    }
}
