//! Failure classification shared by every layer of a search run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification attached to every step failure and error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request rejected before any step ran.
    Validation,
    /// Timeouts, network hiccups, rate limits. Retried within a step.
    Transient,
    /// Auth failures, exhausted quota, bot challenges, crashed targets.
    Permanent,
    /// The consumer went away or the run was cancelled.
    Cancelled,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Fatal kinds stop the whole run instead of only the failing track.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that know their own classification.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}
