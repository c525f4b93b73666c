//! Batching, transmission and retry of envelopes.
//!
//! Tracking calls push envelopes into a bounded queue without blocking. A single worker task
//! groups them into batches by size and time, hands batches to transmission tasks (at most
//! `max_concurrent_transmissions` at a time), and interprets the outcome: acknowledged items are
//! done, retriable ones are scheduled again with exponential backoff, a `Retry-After` pauses all
//! transmissions, and permanent failures are dropped. Closing drains the channel within a timeout
//! and spills what is left to the spool directory.

mod retry;
pub(crate) mod spool;
mod worker;

use crate::{
    config::TelemetryConfig,
    diagnostics::{Diagnostic, Diagnostics, DropReason},
    models::Envelope,
    Error,
};
use http::Uri;
use opentelemetry_http::HttpClient;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot, watch,
    },
    time::Instant,
};
use worker::Worker;

#[derive(Debug)]
pub(crate) enum ChannelMessage {
    Envelope(Envelope),
    Reload(Vec<Envelope>),
    Flush,
    Close {
        timeout: Duration,
        done: oneshot::Sender<CloseReport>,
    },
}

/// What happened to the envelopes still pending when the channel closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseReport {
    /// Whether everything was sent before the timeout.
    pub completed: bool,
    /// Envelopes written to the spool directory.
    pub spilled: usize,
    /// Envelopes lost because there was no spool directory or writing it failed.
    pub dropped: usize,
}

#[derive(Debug)]
pub(crate) struct InMemoryChannel {
    sender: mpsc::Sender<ChannelMessage>,
    closed: AtomicBool,
    throttled_until: watch::Receiver<Option<Instant>>,
    diagnostics: Diagnostics,
    runtime: Handle,
}

impl InMemoryChannel {
    /// Starts the worker on the current Tokio runtime.
    pub(crate) fn new<C: HttpClient + 'static>(
        client: Arc<C>,
        endpoint: Uri,
        config: &TelemetryConfig,
        diagnostics: Diagnostics,
    ) -> Result<Self, Error> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let (throttle, throttled_until) = watch::channel(None);
        let worker = Worker::new(client, endpoint, config, diagnostics.clone(), throttle);
        runtime.spawn(worker.run(receiver));
        Ok(Self {
            sender,
            closed: AtomicBool::new(false),
            throttled_until,
            diagnostics,
            runtime,
        })
    }

    /// Enqueues an envelope. Never blocks; drops the envelope when the queue is full or the
    /// channel is closed.
    pub(crate) fn send(&self, envelope: Envelope) {
        if self.closed.load(Ordering::Acquire) {
            self.dropped(1, DropReason::Closed);
            return;
        }
        match self.sender.try_send(ChannelMessage::Envelope(envelope)) {
            Ok(()) => self.diagnostics.record_accepted(1),
            Err(TrySendError::Full(_)) => self.dropped(1, DropReason::QueueFull),
            Err(TrySendError::Closed(_)) => self.dropped(1, DropReason::Closed),
        }
    }

    /// Enqueues envelopes read back from the spool directory as one message.
    pub(crate) fn reload(&self, envelopes: Vec<Envelope>) -> Result<(), Error> {
        let count = envelopes.len();
        match self.sender.try_send(ChannelMessage::Reload(envelopes)) {
            Ok(()) => {
                self.diagnostics.record_accepted(count);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(Error::Config(
                "telemetry queue is full, spool not reloaded".into(),
            )),
            Err(TrySendError::Closed(_)) => Err(Error::ChannelClosed),
        }
    }

    /// Asks the worker to send the current buffer now. Ordered after every envelope enqueued
    /// before.
    pub(crate) fn flush(&self) {
        match self.sender.try_send(ChannelMessage::Flush) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(message)) => {
                let sender = self.sender.clone();
                self.runtime.spawn(async move {
                    let _ = sender.send(message).await;
                });
            }
        }
    }

    /// Stops accepting envelopes and drains the channel within `timeout`.
    pub(crate) async fn close(&self, timeout: Duration) -> CloseReport {
        if self.closed.swap(true, Ordering::AcqRel) {
            return CloseReport::default();
        }
        let (done, report) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        let enqueued = tokio::time::timeout_at(
            deadline,
            self.sender.send(ChannelMessage::Close { timeout, done }),
        )
        .await;
        if !matches!(enqueued, Ok(Ok(()))) {
            tracing::debug!("telemetry channel worker unavailable while closing");
            return CloseReport::default();
        }
        report.await.unwrap_or_default()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn is_throttled(&self) -> bool {
        self.throttled_until
            .borrow()
            .map_or(false, |until| Instant::now() < until)
    }

    fn dropped(&self, count: usize, reason: DropReason) {
        self.diagnostics
            .emit(Diagnostic::ItemsDropped { count, reason });
    }
}
