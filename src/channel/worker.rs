use super::{retry::RetryPolicy, spool, ChannelMessage, CloseReport};
use crate::{
    config::TelemetryConfig,
    diagnostics::{Diagnostic, Diagnostics, DropReason},
    models::Envelope,
    uploader::{self, Outcome},
    Error,
};
use futures_util::FutureExt;
use http::Uri;
use opentelemetry_http::HttpClient;
use std::{
    collections::{HashMap, VecDeque},
    panic::AssertUnwindSafe,
    path::PathBuf,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinSet,
    time::{sleep_until, Instant},
};

/// Drain budget when every handle was dropped without closing the channel.
const IMPLICIT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct PendingBatch {
    items: Arc<Vec<Envelope>>,
    /// Attempts already made.
    attempts: u32,
    not_before: Instant,
}

#[derive(Debug)]
struct Closing {
    deadline: Instant,
    done: Option<oneshot::Sender<CloseReport>>,
}

/// Owns all batching state. Runs as a single task; transmissions run as tasks of their own.
pub(super) struct Worker<C: ?Sized> {
    client: Arc<C>,
    endpoint: Arc<Uri>,
    diagnostics: Diagnostics,
    max_batch_size: usize,
    max_batch_interval: Duration,
    high_water_mark: usize,
    max_concurrent: usize,
    retry: RetryPolicy,
    spool_dir: Option<PathBuf>,

    buffer: Vec<Envelope>,
    buffer_deadline: Option<Instant>,
    ready: VecDeque<PendingBatch>,
    in_flight: JoinSet<(u64, Outcome)>,
    in_flight_batches: HashMap<u64, PendingBatch>,
    next_batch_id: u64,
    throttled_until: Option<Instant>,
    throttle: watch::Sender<Option<Instant>>,
    closing: Option<Closing>,
}

impl<C: HttpClient + ?Sized + 'static> Worker<C> {
    pub(super) fn new(
        client: Arc<C>,
        endpoint: Uri,
        config: &TelemetryConfig,
        diagnostics: Diagnostics,
        throttle: watch::Sender<Option<Instant>>,
    ) -> Self {
        Self {
            client,
            endpoint: Arc::new(endpoint),
            diagnostics,
            max_batch_size: config.max_batch_size,
            max_batch_interval: config.max_batch_interval,
            high_water_mark: config.high_water_mark,
            max_concurrent: config.max_concurrent_transmissions,
            retry: RetryPolicy::new(
                config.initial_retry_interval,
                config.max_retry_interval,
                config.max_attempts,
            ),
            spool_dir: config.spool_dir.clone(),
            buffer: Vec::new(),
            buffer_deadline: None,
            ready: VecDeque::new(),
            in_flight: JoinSet::new(),
            in_flight_batches: HashMap::new(),
            next_batch_id: 0,
            throttled_until: None,
            throttle,
            closing: None,
        }
    }

    pub(super) async fn run(mut self, mut messages: mpsc::Receiver<ChannelMessage>) {
        loop {
            let now = Instant::now();
            self.on_timers(now);
            self.dispatch(now);

            if let Some(closing) = &self.closing {
                if self.is_drained() {
                    self.finish(true);
                    return;
                }
                if now >= closing.deadline || self.nothing_due_before(closing.deadline) {
                    self.in_flight.abort_all();
                    self.finish(false);
                    return;
                }
            }

            let wakeup = self.next_wakeup();
            let closing = self.closing.is_some();
            tokio::select! {
                message = messages.recv(), if !closing => match message {
                    Some(message) => self.on_message(message, &mut messages),
                    None => self.start_closing(Instant::now() + IMPLICIT_CLOSE_TIMEOUT, None, &mut messages),
                },
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Ok((batch_id, outcome)) = joined {
                        self.on_outcome(batch_id, outcome);
                    }
                },
                _ = sleep_until_or_forever(wakeup) => {},
            }
        }
    }

    fn on_message(&mut self, message: ChannelMessage, messages: &mut mpsc::Receiver<ChannelMessage>) {
        match message {
            ChannelMessage::Envelope(envelope) => self.push(envelope),
            ChannelMessage::Reload(envelopes) => {
                for envelope in envelopes {
                    self.push(envelope);
                }
            }
            ChannelMessage::Flush => self.seal_buffer(),
            ChannelMessage::Close { timeout, done } => {
                self.start_closing(Instant::now() + timeout, Some(done), messages)
            }
        }
    }

    fn start_closing(
        &mut self,
        deadline: Instant,
        done: Option<oneshot::Sender<CloseReport>>,
        messages: &mut mpsc::Receiver<ChannelMessage>,
    ) {
        // Accept what producers managed to enqueue, nothing after.
        messages.close();
        while let Ok(message) = messages.try_recv() {
            match message {
                ChannelMessage::Envelope(envelope) => self.push(envelope),
                ChannelMessage::Reload(envelopes) => {
                    for envelope in envelopes {
                        self.push(envelope);
                    }
                }
                ChannelMessage::Flush => {}
                ChannelMessage::Close { done, .. } => {
                    let _ = done.send(CloseReport::default());
                }
            }
        }
        self.seal_buffer();
        tracing::debug!(pending = self.pending_count(), "telemetry channel closing");
        self.closing = Some(Closing { deadline, done });
    }

    fn push(&mut self, envelope: Envelope) {
        if self.buffer.is_empty() {
            self.buffer_deadline = Some(Instant::now() + self.max_batch_interval);
        }
        self.buffer.push(envelope);
        self.enforce_high_water_mark();
        if self.buffer.len() >= self.max_batch_size {
            self.seal_buffer();
        }
    }

    fn pending_count(&self) -> usize {
        self.buffer.len()
            + self.ready.iter().map(|b| b.items.len()).sum::<usize>()
            + self
                .in_flight_batches
                .values()
                .map(|b| b.items.len())
                .sum::<usize>()
    }

    fn enforce_high_water_mark(&mut self) {
        let excess = self.pending_count().saturating_sub(self.high_water_mark);
        let mut dropped = 0;
        while dropped < excess {
            let wanted = excess - dropped;
            if let Some(oldest) = self.ready.front_mut() {
                if oldest.items.len() <= wanted {
                    dropped += oldest.items.len();
                    self.ready.pop_front();
                } else {
                    Arc::make_mut(&mut oldest.items).drain(..wanted);
                    dropped += wanted;
                }
            } else if !self.buffer.is_empty() {
                let count = wanted.min(self.buffer.len());
                self.buffer.drain(..count);
                dropped += count;
            } else {
                break;
            }
        }
        if self.buffer.is_empty() {
            self.buffer_deadline = None;
        }
        if dropped > 0 {
            self.diagnostics.emit(Diagnostic::ItemsDropped {
                count: dropped,
                reason: DropReason::HighWaterMark,
            });
        }
    }

    /// Turns the buffer into a batch that is due now.
    fn seal_buffer(&mut self) {
        self.buffer_deadline = None;
        if self.buffer.is_empty() {
            return;
        }
        let items = std::mem::take(&mut self.buffer);
        self.ready.push_back(PendingBatch {
            items: Arc::new(items),
            attempts: 0,
            not_before: Instant::now(),
        });
    }

    fn on_timers(&mut self, now: Instant) {
        if self.buffer_deadline.map_or(false, |deadline| deadline <= now) {
            self.seal_buffer();
        }
        if self.throttled_until.map_or(false, |until| until <= now) {
            self.throttled_until = None;
            self.throttle.send_replace(None);
            tracing::debug!("telemetry throttling ended");
        }
    }

    fn dispatch(&mut self, now: Instant) {
        if self.throttled_until.is_some() {
            return;
        }
        while self.in_flight.len() < self.max_concurrent {
            let Some(position) = self.ready.iter().position(|b| b.not_before <= now) else {
                break;
            };
            let Some(batch) = self.ready.remove(position) else {
                break;
            };
            let batch_id = self.next_batch_id;
            self.next_batch_id += 1;

            let client = self.client.clone();
            let endpoint = self.endpoint.clone();
            let items = batch.items.clone();
            let diagnostics = self.diagnostics.clone();
            tracing::debug!(
                batch_id,
                items = items.len(),
                attempt = batch.attempts + 1,
                "sending telemetry batch"
            );
            self.in_flight.spawn(async move {
                let outcome =
                    AssertUnwindSafe(uploader::send(&*client, &endpoint, &items, &diagnostics))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Outcome::Retry {
                            error: Error::UploadConnection("transmission panicked".into()),
                            retry_after: None,
                        });
                (batch_id, outcome)
            });
            self.in_flight_batches.insert(batch_id, batch);
        }
    }

    fn on_outcome(&mut self, batch_id: u64, outcome: Outcome) {
        let Some(batch) = self.in_flight_batches.remove(&batch_id) else {
            return;
        };
        let attempts = batch.attempts + 1;
        match outcome {
            Outcome::Success { accepted } => {
                tracing::debug!(batch_id, accepted, "telemetry batch sent");
                self.diagnostics.record_sent(accepted);
            }
            Outcome::PartialSuccess {
                accepted,
                retry,
                rejected,
                retry_after,
            } => {
                tracing::debug!(
                    batch_id,
                    accepted,
                    retry = retry.len(),
                    rejected,
                    "telemetry batch partially accepted"
                );
                self.diagnostics.record_sent(accepted);
                if rejected > 0 {
                    self.diagnostics.emit(Diagnostic::ItemsDropped {
                        count: rejected,
                        reason: DropReason::PartialRejected,
                    });
                }
                if retry.is_empty() {
                    return;
                }
                let items: Vec<Envelope> = retry
                    .into_iter()
                    .filter_map(|index| batch.items.get(index).cloned())
                    .collect();
                match self.retry_delay(attempts, retry_after) {
                    Some(delay) => {
                        self.diagnostics.record_retried(items.len());
                        self.ready.push_back(PendingBatch {
                            items: Arc::new(items),
                            attempts,
                            not_before: Instant::now() + delay,
                        });
                    }
                    None => self.diagnostics.emit(Diagnostic::ItemsDropped {
                        count: items.len(),
                        reason: DropReason::RetriesExhausted,
                    }),
                }
            }
            Outcome::Throttled { retry_after } => {
                let delay = retry_after
                    .or_else(|| self.retry.delay(attempts))
                    .unwrap_or(self.max_batch_interval);
                let until = Instant::now() + delay;
                self.throttled_until = Some(until);
                self.throttle.send_replace(Some(until));
                self.diagnostics.emit(Diagnostic::Throttled {
                    until: SystemTime::now() + delay,
                });
                self.diagnostics.record_retried(batch.items.len());
                // Throttling is not the batch's fault, it keeps its attempts.
                self.ready.push_front(PendingBatch {
                    not_before: until,
                    ..batch
                });
            }
            Outcome::Retry { error, retry_after } => match self.retry_delay(attempts, retry_after) {
                Some(delay) => {
                    self.diagnostics.emit(Diagnostic::TransmissionFailed {
                        error,
                        will_retry: true,
                    });
                    self.diagnostics.record_retried(batch.items.len());
                    self.ready.push_back(PendingBatch {
                        items: batch.items,
                        attempts,
                        not_before: Instant::now() + delay,
                    });
                }
                None => {
                    self.diagnostics.emit(Diagnostic::TransmissionFailed {
                        error,
                        will_retry: false,
                    });
                    self.diagnostics.emit(Diagnostic::ItemsDropped {
                        count: batch.items.len(),
                        reason: DropReason::RetriesExhausted,
                    });
                }
            },
            Outcome::Permanent { error } => {
                self.diagnostics.emit(Diagnostic::TransmissionFailed {
                    error,
                    will_retry: false,
                });
                self.diagnostics.emit(Diagnostic::ItemsDropped {
                    count: batch.items.len(),
                    reason: DropReason::PermanentFailure,
                });
            }
        }
    }

    /// Backoff after `attempts` failed attempts, stretched to the endpoint's `Retry-After`.
    fn retry_delay(&self, attempts: u32, retry_after: Option<Duration>) -> Option<Duration> {
        let backoff = self.retry.delay(attempts)?;
        Some(retry_after.map_or(backoff, |retry_after| backoff.max(retry_after)))
    }

    fn is_drained(&self) -> bool {
        self.buffer.is_empty() && self.ready.is_empty() && self.in_flight.is_empty()
    }

    /// Whether the remaining work can only start after `deadline`.
    fn nothing_due_before(&self, deadline: Instant) -> bool {
        if !self.in_flight.is_empty() || !self.buffer.is_empty() {
            return false;
        }
        let resume = self.throttled_until;
        self.ready
            .iter()
            .all(|batch| resume.unwrap_or(batch.not_before).max(batch.not_before) >= deadline)
    }

    fn next_wakeup(&self) -> Option<Instant> {
        let mut wakeup = self.buffer_deadline;
        let mut consider = |at: Instant| {
            wakeup = Some(wakeup.map_or(at, |current| current.min(at)));
        };
        if let Some(until) = self.throttled_until {
            consider(until);
        } else if self.in_flight.len() < self.max_concurrent {
            if let Some(at) = self.ready.iter().map(|b| b.not_before).min() {
                consider(at);
            }
        }
        if let Some(closing) = &self.closing {
            consider(closing.deadline);
        }
        wakeup
    }

    /// Spills what is left and reports to the closer.
    fn finish(mut self, completed: bool) {
        let mut leftovers: Vec<Envelope> = Vec::new();
        let mut in_flight: Vec<(u64, PendingBatch)> = self.in_flight_batches.drain().collect();
        in_flight.sort_by_key(|(batch_id, _)| *batch_id);
        for (_, batch) in in_flight {
            leftovers.extend(batch.items.iter().cloned());
        }
        for batch in self.ready.drain(..) {
            leftovers.extend(batch.items.iter().cloned());
        }
        leftovers.append(&mut self.buffer);

        let mut report = CloseReport {
            completed,
            spilled: 0,
            dropped: 0,
        };
        if !leftovers.is_empty() {
            match &self.spool_dir {
                Some(dir) => match spool::write(dir, &leftovers, &self.diagnostics) {
                    Ok(path) => {
                        report.spilled = leftovers.len();
                        self.diagnostics.emit(Diagnostic::Spilled {
                            path,
                            count: leftovers.len(),
                        });
                    }
                    Err(error) => {
                        report.dropped = leftovers.len();
                        self.diagnostics.emit(Diagnostic::SpillFailed {
                            error,
                            count: leftovers.len(),
                        });
                    }
                },
                None => {
                    report.dropped = leftovers.len();
                    self.diagnostics.emit(Diagnostic::ItemsDropped {
                        count: leftovers.len(),
                        reason: DropReason::Shutdown,
                    });
                }
            }
        }
        self.throttle.send_replace(None);
        tracing::debug!(
            completed,
            spilled = report.spilled,
            dropped = report.dropped,
            "telemetry channel closed"
        );
        if let Some(done) = self.closing.take().and_then(|closing| closing.done) {
            let _ = done.send(report);
        }
    }
}

async fn sleep_until_or_forever(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
