//! Periodic re-verification.
//!
//! [`Monitor`] repeats [`Session::verify`] on a fixed interval until its
//! [`CancelSignal`] fires. Each tick checks for cancellation, sleeps (woken
//! early by cancellation), checks again, verifies, and yields a
//! [`TimestampedReport`]. Cancellation ends the sequence without an error and
//! without a report for the interrupted tick.
//!
//! Two ways to run it:
//! - in the caller's task, with [`Monitor::next_report`] or as a
//!   [`futures::Stream`] via [`monitor`];
//! - in the background, with [`MonitorWorker`], which owns the session and
//!   hands reports over a bounded channel that the consumer polls.

use crate::command_set::ChannelConfig;
use crate::engine::VerifyOptions;
use crate::error::{AppResult, VerifyError};
use crate::report::VerificationReport;
use crate::session::Session;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Default report queue depth for [`MonitorWorker`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Cooperative cancellation flag shared between a monitor and its owner.
///
/// Clones observe the same flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    /// A fresh, un-cancelled signal.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request cancellation. Repeated calls are harmless.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// True once [`CancelSignal::cancel`] has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so this only returns once cancelled.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// One monitor tick.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedReport {
    /// 1-based tick counter.
    pub tick: u64,
    /// Wall-clock time the report was produced; strictly increasing.
    pub timestamp: DateTime<Utc>,
    /// The verification result.
    pub report: VerificationReport,
}

/// Options for a monitor run.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorOptions {
    /// Delay before each verification.
    pub interval: Duration,
    /// Options for each verify pass.
    pub verify: VerifyOptions,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            verify: VerifyOptions::default(),
        }
    }
}

impl MonitorOptions {
    /// Options with the given interval.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }
}

/// Lazy monitor over a borrowed session.
///
/// Dropping it leaves the session untouched; a new monitor can be started on
/// the same session afterwards.
pub struct Monitor<'a, T: Transport> {
    session: &'a mut Session<T>,
    config: &'a ChannelConfig,
    options: MonitorOptions,
    cancel: CancelSignal,
    tick: u64,
    last_timestamp: Option<DateTime<Utc>>,
    finished: bool,
}

impl<'a, T: Transport> Monitor<'a, T> {
    /// Monitor `session` against `config` until `cancel` fires.
    pub fn new(
        session: &'a mut Session<T>,
        config: &'a ChannelConfig,
        options: MonitorOptions,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            session,
            config,
            options,
            cancel,
            tick: 0,
            last_timestamp: None,
            finished: false,
        }
    }

    /// Ticks completed so far.
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Wait one interval and verify.
    ///
    /// Returns `None` once cancelled. An `Err` (the session was closed) also
    /// ends the sequence.
    pub async fn next_report(&mut self) -> Option<AppResult<TimestampedReport>> {
        if self.finished || self.cancel.is_cancelled() {
            self.finished = true;
            return None;
        }

        let cancelled = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => true,
            _ = sleep(self.options.interval) => false,
        };
        if cancelled || self.cancel.is_cancelled() {
            debug!("Monitor cancelled after {} ticks", self.tick);
            self.finished = true;
            return None;
        }

        match self.session.verify(self.config, &self.options.verify).await {
            Ok(report) => {
                self.tick += 1;
                let timestamp = self.next_timestamp();
                Some(Ok(TimestampedReport {
                    tick: self.tick,
                    timestamp,
                    report,
                }))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }

    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + chrono::Duration::nanoseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    /// Adapt into a [`Stream`] of reports.
    pub fn into_stream(self) -> impl Stream<Item = AppResult<TimestampedReport>> + 'a {
        futures::stream::unfold(self, |mut monitor| async move {
            monitor.next_report().await.map(|item| (item, monitor))
        })
    }
}

/// Stream of reports from `session`, one per `options.interval`, until `cancel` fires.
pub fn monitor<'a, T: Transport>(
    session: &'a mut Session<T>,
    config: &'a ChannelConfig,
    options: MonitorOptions,
    cancel: CancelSignal,
) -> impl Stream<Item = AppResult<TimestampedReport>> + 'a {
    Monitor::new(session, config, options, cancel).into_stream()
}

/// Message from a [`MonitorWorker`].
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A completed tick.
    Report(TimestampedReport),
    /// The loop stopped on an error.
    Failed(String),
}

/// Background monitor owning its session.
///
/// Only the worker touches the session until [`MonitorWorker::stop`] hands it
/// back. Dropping the worker cancels the loop.
pub struct MonitorWorker<T: Transport + 'static> {
    events: mpsc::Receiver<WorkerEvent>,
    cancel: CancelSignal,
    handle: Option<JoinHandle<Session<T>>>,
}

impl<T: Transport + 'static> MonitorWorker<T> {
    /// Start monitoring on a new tokio task.
    ///
    /// `capacity` bounds the report queue; when the consumer falls behind the
    /// worker waits for room (or for cancellation).
    pub fn spawn(
        mut session: Session<T>,
        config: ChannelConfig,
        options: MonitorOptions,
        capacity: usize,
    ) -> Self {
        let (tx, events) = mpsc::channel(capacity.max(1));
        let cancel = CancelSignal::new();
        let worker_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            info!("Monitor worker started (interval {:?})", options.interval);
            let mut monitor = Monitor::new(&mut session, &config, options, worker_cancel.clone());
            while let Some(item) = monitor.next_report().await {
                let event = match item {
                    Ok(report) => WorkerEvent::Report(report),
                    Err(e) => {
                        warn!("Monitor worker stopping: {}", e);
                        WorkerEvent::Failed(e.to_string())
                    }
                };
                let delivered = tokio::select! {
                    biased;
                    _ = worker_cancel.cancelled() => false,
                    sent = tx.send(event) => sent.is_ok(),
                };
                if !delivered {
                    break;
                }
            }
            info!("Monitor worker finished after {} ticks", monitor.ticks());
            drop(monitor);
            session
        });

        Self {
            events,
            cancel,
            handle: Some(handle),
        }
    }

    /// Next queued event, without waiting.
    pub fn try_next(&mut self) -> Option<WorkerEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the next event; `None` once the worker has finished and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    /// Signal controlling this worker.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// True once the worker task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the loop, wait for the task, and return the session.
    ///
    /// An in-flight verify pass completes (or times out) first. Reports still
    /// queued are discarded.
    pub async fn stop(mut self) -> AppResult<Session<T>> {
        self.cancel.cancel();
        let handle = self
            .handle
            .take()
            .ok_or_else(|| VerifyError::Worker("worker already stopped".to_string()))?;
        handle
            .await
            .map_err(|e| VerifyError::Worker(e.to_string()))
    }
}

impl<T: Transport + 'static> Drop for MonitorWorker<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_signal_is_shared_and_sticky() {
        let signal = CancelSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_cancelled());
        signal.cancel();
        signal.cancel();
        assert!(observer.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), observer.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_wakes_a_waiting_task() {
        let signal = CancelSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };
        tokio::task::yield_now().await;
        signal.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
