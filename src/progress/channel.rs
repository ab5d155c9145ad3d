use futures::Stream;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::event::{ProgressEvent, SearchEvent, TerminalResult};
use crate::StreamConfig;
use crate::error::ErrorKind;

/// The subscription is gone; nothing published from here on is observed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("progress consumer disconnected")]
pub struct ChannelClosed;

struct Shared {
    terminated: AtomicBool,
    last_activity: Mutex<Instant>,
}

impl Shared {
    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

/// Create the channel for one run
///
/// Spawns the heartbeat task, so it must be called inside a tokio runtime.
/// Dropping the returned subscription cancels `run_cancel`.
pub fn channel(
    config: &StreamConfig,
    run_cancel: CancellationToken,
) -> (ProgressPublisher, ProgressSubscription) {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let shared = Arc::new(Shared {
        terminated: AtomicBool::new(false),
        last_activity: Mutex::new(Instant::now()),
    });
    let heartbeat_stop = run_cancel.child_token();

    let interval = config.heartbeat_interval();
    if !interval.is_zero() {
        tokio::spawn(heartbeat_loop(
            tx.clone(),
            shared.clone(),
            interval,
            heartbeat_stop.clone(),
        ));
    }

    let idle_limit = Some(config.idle_timeout()).filter(|limit| !limit.is_zero());
    let subscription = ProgressSubscription {
        receiver: rx,
        run_cancel,
        idle_limit,
        idle: idle_limit.map(|limit| Box::pin(tokio::time::sleep(limit))),
        finished: false,
    };

    let publisher = ProgressPublisher {
        tx,
        shared,
        heartbeat_stop,
    };

    (publisher, subscription)
}

async fn heartbeat_loop(
    tx: mpsc::Sender<SearchEvent>,
    shared: Arc<Shared>,
    interval: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if shared.is_terminated() {
                    break;
                }
                if shared.idle_for() < interval {
                    continue;
                }
                match tx.try_send(SearchEvent::Progress(ProgressEvent::heartbeat())) {
                    Ok(()) => trace!("heartbeat sent"),
                    Err(TrySendError::Full(_)) => trace!("queue full, heartbeat dropped"),
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        }
    }
    debug!("Heartbeat task stopped");
}

/// Producer half, owned by the run
pub struct ProgressPublisher {
    tx: mpsc::Sender<SearchEvent>,
    shared: Arc<Shared>,
    heartbeat_stop: CancellationToken,
}

impl ProgressPublisher {
    /// Queue `event`, suspending while the queue is full
    ///
    /// Heartbeats never wait: they are dropped when the queue is full.
    pub async fn publish(&self, event: ProgressEvent) -> Result<(), ChannelClosed> {
        if self.shared.is_terminated() {
            debug_assert!(false, "progress event published after the terminal result");
            return Ok(());
        }

        if event.is_heartbeat() {
            return match self.tx.try_send(SearchEvent::Progress(event)) {
                Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
                Err(TrySendError::Closed(_)) => Err(ChannelClosed),
            };
        }

        self.tx
            .send(SearchEvent::Progress(event))
            .await
            .map_err(|_| ChannelClosed)?;
        self.shared.touch();
        Ok(())
    }

    /// Queue the terminal result and close the run's side of the channel
    pub async fn finish(&self, result: TerminalResult) -> Result<(), ChannelClosed> {
        if self.shared.terminated.swap(true, Ordering::AcqRel) {
            debug_assert!(false, "terminal result published twice");
            return Ok(());
        }
        self.heartbeat_stop.cancel();

        self.tx
            .send(SearchEvent::Terminal(result))
            .await
            .map_err(|_| ChannelClosed)
    }
}

impl Drop for ProgressPublisher {
    fn drop(&mut self) {
        self.heartbeat_stop.cancel();
    }
}

/// Consumer half: a finite stream ending with exactly one terminal result
///
/// Not restartable. Dropping it cancels the run. When nothing at all
/// arrives, heartbeats included, for the idle limit the stream ends with a
/// synthesized "Stream timed out." error and the run is cancelled.
pub struct ProgressSubscription {
    receiver: mpsc::Receiver<SearchEvent>,
    run_cancel: CancellationToken,
    idle_limit: Option<Duration>,
    idle: Option<Pin<Box<Sleep>>>,
    finished: bool,
}

impl ProgressSubscription {
    fn reset_idle(&mut self) {
        if let (Some(limit), Some(sleep)) = (self.idle_limit, self.idle.as_mut()) {
            sleep.as_mut().reset(Instant::now() + limit);
        }
    }

    fn terminate(&mut self, kind: ErrorKind, message: &str) -> Poll<Option<SearchEvent>> {
        self.finished = true;
        self.run_cancel.cancel();
        Poll::Ready(Some(SearchEvent::Terminal(TerminalResult::failed(kind, message))))
    }
}

impl Stream for ProgressSubscription {
    type Item = SearchEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                // Heartbeats count: they prove the run task is still alive
                match &event {
                    SearchEvent::Terminal(_) => this.finished = true,
                    SearchEvent::Progress(_) => this.reset_idle(),
                }
                Poll::Ready(Some(event))
            }
            // Producer vanished without a terminal result (panicked task)
            Poll::Ready(None) => this.terminate(ErrorKind::Permanent, "Search ended without a result."),
            Poll::Pending => {
                let timed_out = this
                    .idle
                    .as_mut()
                    .is_some_and(|sleep| sleep.as_mut().poll(cx).is_ready());
                if timed_out {
                    debug!("Progress stream idle limit reached, cancelling run");
                    return this.terminate(ErrorKind::Transient, "Stream timed out.");
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.run_cancel.cancel();
    }
}
