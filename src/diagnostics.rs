//! Visibility into failures of the telemetry pipeline.
//!
//! Tracking calls never return errors. What goes wrong in the background is logged through
//! `tracing`, counted in [`ChannelStats`] and reported to an optional [`DiagnosticListener`].

use crate::Error;
use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::SystemTime,
};

/// Why envelopes were dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DropReason {
    /// The queue between tracking calls and the channel was full.
    QueueFull,
    /// The channel held more envelopes than its high-water mark.
    HighWaterMark,
    /// The channel was closed.
    Closed,
    /// The ingestion endpoint rejected the batch and retrying would not help.
    PermanentFailure,
    /// The ingestion endpoint rejected single items of a batch.
    PartialRejected,
    /// The batch failed on every attempt.
    RetriesExhausted,
    /// The channel closed before the envelopes could be sent and there was no spool directory.
    Shutdown,
    /// The envelope failed to serialize.
    Encoding,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DropReason::QueueFull => "queue full",
            DropReason::HighWaterMark => "high-water mark exceeded",
            DropReason::Closed => "channel closed",
            DropReason::PermanentFailure => "permanent failure",
            DropReason::PartialRejected => "rejected by ingestion",
            DropReason::RetriesExhausted => "retries exhausted",
            DropReason::Shutdown => "shutdown",
            DropReason::Encoding => "encoding failed",
        })
    }
}

/// Something that went wrong in the background.
#[derive(Debug)]
#[non_exhaustive]
pub enum Diagnostic {
    /// An envelope failed to serialize and was dropped. The rest of its batch was sent.
    EncodingFailed {
        /// The serialization error.
        error: Error,
    },
    /// A transmission failed.
    TransmissionFailed {
        /// Why.
        error: Error,
        /// Whether the batch will be sent again.
        will_retry: bool,
    },
    /// Envelopes were dropped.
    ItemsDropped {
        /// Number of envelopes.
        count: usize,
        /// Why they were dropped.
        reason: DropReason,
    },
    /// The ingestion endpoint asked the client to pause.
    Throttled {
        /// No transmissions happen before this time.
        until: SystemTime,
    },
    /// Envelopes could not be written to the spool directory and are lost.
    SpillFailed {
        /// The I/O error.
        error: Error,
        /// Number of lost envelopes.
        count: usize,
    },
    /// Envelopes were written to the spool directory.
    Spilled {
        /// The spool file.
        path: PathBuf,
        /// Number of envelopes in it.
        count: usize,
    },
    /// A sampling processor panicked. The item was kept.
    SamplerPanicked,
}

/// Receives [`Diagnostic`]s.
///
/// Implemented for every `Fn(&Diagnostic) + Send + Sync`. Listeners are called from the channel
/// worker and from tracking calls, so they should return quickly. Panics are caught and ignored.
pub trait DiagnosticListener: Send + Sync {
    /// Called for every diagnostic.
    fn on_diagnostic(&self, diagnostic: &Diagnostic);
}

impl<F> DiagnosticListener for F
where
    F: Fn(&Diagnostic) + Send + Sync,
{
    fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        self(diagnostic)
    }
}

/// Counters of a channel. See [`crate::TelemetryClient::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Envelopes accepted by the channel.
    pub accepted: u64,
    /// Envelopes acknowledged by the ingestion endpoint.
    pub sent: u64,
    /// Envelopes dropped for any reason.
    pub dropped: u64,
    /// Envelopes scheduled to be sent again.
    pub retried: u64,
    /// Envelopes written to the spool directory.
    pub spilled: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    retried: AtomicU64,
    spilled: AtomicU64,
}

/// Shared sink for diagnostics: logs, counts and forwards to the listener.
#[derive(Clone, Default)]
pub(crate) struct Diagnostics {
    listener: Option<Arc<dyn DiagnosticListener>>,
    counters: Arc<Counters>,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("listener", &self.listener.is_some())
            .field("counters", &self.counters)
            .finish()
    }
}

impl Diagnostics {
    pub(crate) fn new(listener: Option<Arc<dyn DiagnosticListener>>) -> Self {
        Self {
            listener,
            counters: Arc::default(),
        }
    }

    pub(crate) fn emit(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::EncodingFailed { error } => {
                tracing::warn!(%error, "dropping telemetry item that failed to encode");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Diagnostic::TransmissionFailed { error, will_retry } => {
                tracing::warn!(%error, will_retry, "telemetry transmission failed");
            }
            Diagnostic::ItemsDropped { count, reason } => {
                tracing::warn!(count, %reason, "dropping telemetry items");
                self.counters
                    .dropped
                    .fetch_add(*count as u64, Ordering::Relaxed);
            }
            Diagnostic::Throttled { until } => {
                tracing::info!(until = %httpdate::fmt_http_date(*until), "telemetry throttled");
            }
            Diagnostic::SpillFailed { error, count } => {
                tracing::error!(%error, count, "writing telemetry spool failed");
                self.counters
                    .dropped
                    .fetch_add(*count as u64, Ordering::Relaxed);
            }
            Diagnostic::Spilled { path, count } => {
                tracing::info!(path = %path.display(), count, "telemetry spilled to disk");
                self.counters
                    .spilled
                    .fetch_add(*count as u64, Ordering::Relaxed);
            }
            Diagnostic::SamplerPanicked => {
                tracing::error!("sampling processor panicked, keeping item");
            }
        }

        if let Some(listener) = &self.listener {
            if catch_unwind(AssertUnwindSafe(|| listener.on_diagnostic(&diagnostic))).is_err() {
                tracing::debug!("diagnostic listener panicked");
            }
        }
    }

    pub(crate) fn record_accepted(&self, count: usize) {
        self.counters
            .accepted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self, count: usize) {
        self.counters.sent.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_retried(&self, count: usize) {
        self.counters
            .retried
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> ChannelStats {
        ChannelStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            sent: self.counters.sent.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            spilled: self.counters.spilled.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn listener_receives_diagnostics_and_counters_follow() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listener_seen = seen.clone();
        let diagnostics = Diagnostics::new(Some(Arc::new(move |diagnostic: &Diagnostic| {
            listener_seen
                .lock()
                .unwrap()
                .push(format!("{:?}", diagnostic));
        })));

        diagnostics.record_accepted(3);
        diagnostics.emit(Diagnostic::ItemsDropped {
            count: 2,
            reason: DropReason::QueueFull,
        });
        diagnostics.emit(Diagnostic::Spilled {
            path: PathBuf::from("spool/1.jsonl"),
            count: 1,
        });

        assert_eq!(
            ChannelStats {
                accepted: 3,
                sent: 0,
                dropped: 2,
                retried: 0,
                spilled: 1,
            },
            diagnostics.stats()
        );
        let seen = seen.lock().unwrap();
        assert_eq!(2, seen.len());
        assert!(seen[0].contains("QueueFull"));
    }

    #[test]
    fn panicking_listener_is_contained() {
        let diagnostics = Diagnostics::new(Some(Arc::new(|_: &Diagnostic| panic!("listener"))));
        diagnostics.emit(Diagnostic::SamplerPanicked);
        diagnostics.record_sent(1);
        assert_eq!(1, diagnostics.stats().sent);
    }
}
