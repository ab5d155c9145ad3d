//! Progress channel between a running search and its consumer
//!
//! Single producer, single consumer, bounded. The producer suspends when the
//! consumer falls behind; heartbeats are dropped instead. Every run ends with
//! exactly one [`TerminalResult`].

mod channel;
mod event;

pub use channel::{ChannelClosed, ProgressPublisher, ProgressSubscription, channel};
pub use event::{
    EventKind, ProgressEvent, ResultOutput, SearchEvent, TerminalResult, TerminalStatus,
};
