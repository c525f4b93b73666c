use crate::{
    assembler::EnvelopeAssembler,
    channel::{CloseReport, InMemoryChannel},
    config::TelemetryConfig,
    correlation::{propagation, CorrelationContext},
    diagnostics::{ChannelStats, Diagnostic, Diagnostics},
    models::SeverityLevel,
    pipeline::new_pipeline_from_env,
    sampling::SamplingProcessor,
    telemetry::*,
    redact::sanitize_url,
    Error,
};
use opentelemetry_http::HttpClient;
use std::{
    error::Error as StdError,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Tracks telemetry and sends it to Application Insights in the background.
///
/// Cheap to clone; clones share the same channel. Tracking calls never block, never fail and
/// never panic. Problems are reported through the diagnostic listener configured on the
/// [pipeline](crate::new_pipeline_from_connection_string).
///
/// Items tracked without an explicit correlation context use the ambient one (see
/// [`crate::correlation::propagation::scope`]), if any.
///
/// ```no_run
/// # async fn run(http_client: impl opentelemetry_http::HttpClient + 'static) -> Result<(), application_insights::Error> {
/// use application_insights::{EventTelemetry, TelemetryClient};
/// use std::time::Duration;
///
/// let client = TelemetryClient::from_connection_string(
///     "InstrumentationKey=0fdcec70-0ce5-4085-89d9-9ae8ead9af66",
///     http_client,
/// )?;
/// client.track(EventTelemetry::new("order placed").with_property("region", "eu"));
/// client.close(Duration::from_secs(5)).await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TelemetryClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    assembler: EnvelopeAssembler,
    sampler: Arc<dyn SamplingProcessor>,
    channel: InMemoryChannel,
    diagnostics: Diagnostics,
    enabled: AtomicBool,
    config: TelemetryConfig,
}

impl TelemetryClient {
    pub(crate) fn start<C: HttpClient + 'static>(
        instrumentation_key: &str,
        endpoint: http::Uri,
        client: C,
        config: TelemetryConfig,
        sampler: Arc<dyn SamplingProcessor>,
        diagnostics: Diagnostics,
    ) -> Result<Self, Error> {
        let channel =
            InMemoryChannel::new(Arc::new(client), endpoint, &config, diagnostics.clone())?;
        if config.reload_spool {
            if let Some(dir) = &config.spool_dir {
                reload_spool(&channel, dir);
            }
        }
        Ok(Self {
            inner: Arc::new(ClientInner {
                assembler: EnvelopeAssembler::new(instrumentation_key, &config),
                sampler,
                channel,
                diagnostics,
                enabled: AtomicBool::new(true),
                config,
            }),
        })
    }

    /// Create a client with default settings. Has to be called within a Tokio runtime.
    pub fn from_connection_string<C: HttpClient + 'static>(
        connection_string: impl AsRef<str>,
        client: C,
    ) -> Result<Self, Error> {
        crate::new_pipeline_from_connection_string(connection_string)?
            .with_client(client)
            .build()
    }

    /// Create a client with default settings, reading the connection string from the
    /// `APPLICATIONINSIGHTS_CONNECTION_STRING` environment variable. Has to be called within a
    /// Tokio runtime.
    pub fn from_env<C: HttpClient + 'static>(client: C) -> Result<Self, Error> {
        new_pipeline_from_env()?.with_client(client).build()
    }

    /// Track an item, correlated with the ambient context if there is one.
    pub fn track(&self, item: impl Into<Telemetry>) {
        let context = propagation::current();
        self.track_with_context(item, context.as_ref());
    }

    /// Track an item correlated with `context`. `None` starts a new operation for the item.
    pub fn track_with_context(
        &self,
        item: impl Into<Telemetry>,
        context: Option<&CorrelationContext>,
    ) {
        if !self.is_enabled() {
            return;
        }
        let inner = &*self.inner;
        let mut envelope = inner.assembler.assemble(item.into(), context);

        let keep = match catch_unwind(AssertUnwindSafe(|| {
            inner.sampler.should_sample(&mut envelope)
        })) {
            Ok(keep) => keep,
            Err(_) => {
                inner.diagnostics.emit(Diagnostic::SamplerPanicked);
                envelope.sample_rate = 1.0;
                true
            }
        };
        if !keep {
            return;
        }
        // Kept items always carry a positive weight.
        if !(envelope.sample_rate > 0.0) {
            envelope.sample_rate = 1.0;
        }
        inner.channel.send(envelope);
    }

    /// Track a custom event.
    pub fn track_event(&self, name: impl Into<String>) {
        self.track(EventTelemetry::new(name));
    }

    /// Track a trace message.
    pub fn track_trace(&self, message: impl Into<String>, severity: SeverityLevel) {
        self.track(TraceTelemetry::new(message, severity));
    }

    /// Track a metric value.
    pub fn track_metric(&self, name: impl Into<String>, value: f64) {
        self.track(MetricTelemetry::new(name, value));
    }

    /// Track an error and its chain of sources.
    pub fn track_exception<E: StdError + ?Sized>(&self, error: &E) {
        self.track(ExceptionTelemetry::from_error(error));
    }

    /// Track an incoming request. Prefer [`crate::RequestTrackingLayer`] for HTTP servers.
    pub fn track_request(
        &self,
        method: impl Into<String>,
        url: &str,
        duration: Duration,
        response_code: u16,
    ) {
        let url = self.sanitize_url(url);
        self.track(RequestTelemetry::new(method, url, duration, response_code));
    }

    /// Track an outgoing call. Prefer [`crate::TrackedHttpClient`] for HTTP calls.
    pub fn track_dependency(
        &self,
        name: impl Into<String>,
        dependency_type: impl Into<String>,
        target: impl Into<String>,
        duration: Duration,
        result_code: impl Into<String>,
        success: bool,
    ) {
        self.track(RemoteDependencyTelemetry::new(
            name,
            dependency_type,
            target,
            duration,
            result_code,
            success,
        ));
    }

    /// Track the result of an availability test.
    pub fn track_availability(&self, name: impl Into<String>, duration: Duration, success: bool) {
        self.track(AvailabilityTelemetry::new(name, duration, success));
    }

    /// Track a page view.
    pub fn track_page_view(&self, name: impl Into<String>) {
        self.track(PageViewTelemetry::new(name));
    }

    /// Send buffered items as soon as possible. Returns immediately.
    pub fn flush(&self) {
        self.inner.channel.flush();
    }

    /// Stop accepting items and send what is pending, waiting at most `timeout`. Items that could
    /// not be sent in time are written to the spool directory, if configured.
    ///
    /// Closing affects every clone of this client. Closing twice returns an empty report.
    pub async fn close(&self, timeout: Duration) -> CloseReport {
        self.inner.channel.close(timeout).await
    }

    /// Whether the ingestion endpoint asked the client to pause.
    pub fn is_throttled(&self) -> bool {
        self.inner.channel.is_throttled()
    }

    /// Turn tracking on or off at runtime. Disabled clients ignore tracking calls.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether tracking calls are processed.
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    /// Whether [`TelemetryClient::close`] was called on this client or one of its clones.
    pub fn is_closed(&self) -> bool {
        self.inner.channel.is_closed()
    }

    /// Counters of the channel.
    pub fn stats(&self) -> ChannelStats {
        self.inner.diagnostics.stats()
    }

    pub(crate) fn sanitize_url(&self, url: &str) -> String {
        sanitize_url(
            url,
            &self.inner.config.redacted_query_params,
            self.inner.config.max_url_length,
        )
    }
}

fn reload_spool(channel: &InMemoryChannel, dir: &std::path::Path) {
    let files = match crate::channel::spool::load(dir) {
        Ok(files) => files,
        Err(err) => {
            tracing::debug!(error = %err, "no telemetry spool to reload");
            return;
        }
    };
    for (path, envelopes) in files {
        let count = envelopes.len();
        if let Err(err) = channel.reload(envelopes) {
            tracing::warn!(path = %path.display(), error = %err, "reloading telemetry spool failed");
            return;
        }
        if let Err(err) = crate::channel::spool::remove(&path) {
            tracing::warn!(path = %path.display(), error = %err, "removing telemetry spool file failed");
        }
        tracing::info!(path = %path.display(), count, "telemetry spool reloaded");
    }
}
