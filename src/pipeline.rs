use crate::{
    client::TelemetryClient,
    config::TelemetryConfig,
    connection_string::ConnectionString,
    diagnostics::{DiagnosticListener, Diagnostics},
    sampling::{NoopSampler, SamplingProcessor},
    uploader::append_path,
    Error,
};
use opentelemetry_http::HttpClient;
use std::{fmt, sync::Arc};

const CONNECTION_STRING_ENV: &str = "APPLICATIONINSIGHTS_CONNECTION_STRING";

/// Create a new telemetry pipeline builder from a connection string.
///
/// ```
/// let builder = application_insights::new_pipeline_from_connection_string(
///     "InstrumentationKey=0fdcec70-0ce5-4085-89d9-9ae8ead9af66",
/// )?;
/// # Ok::<(), application_insights::Error>(())
/// ```
pub fn new_pipeline_from_connection_string(
    connection_string: impl AsRef<str>,
) -> Result<PipelineBuilder<()>, Error> {
    let connection_string: ConnectionString = connection_string.as_ref().parse()?;
    Ok(PipelineBuilder {
        connection_string,
        client: (),
        config: TelemetryConfig::default(),
        sampler: Arc::new(NoopSampler),
        listener: None,
    })
}

/// Create a new telemetry pipeline builder.
///
/// Reads the connection string from the `APPLICATIONINSIGHTS_CONNECTION_STRING` environment
/// variable.
pub fn new_pipeline_from_env() -> Result<PipelineBuilder<()>, Error> {
    let connection_string = std::env::var(CONNECTION_STRING_ENV)
        .map_err(|err| Error::Config(format!("{}: {}", CONNECTION_STRING_ENV, err)))?;
    new_pipeline_from_connection_string(connection_string)
}

/// Builds a [`TelemetryClient`].
pub struct PipelineBuilder<C> {
    connection_string: ConnectionString,
    client: C,
    config: TelemetryConfig,
    sampler: Arc<dyn SamplingProcessor>,
    listener: Option<Arc<dyn DiagnosticListener>>,
}

impl<C: fmt::Debug> fmt::Debug for PipelineBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("connection_string", &self.connection_string)
            .field("client", &self.client)
            .field("config", &self.config)
            .field("sampler", &self.sampler)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl PipelineBuilder<()> {
    /// Set the HTTP client used to send telemetry.
    ///
    /// With the `reqwest-client` feature, `reqwest::Client` can be used directly.
    pub fn with_client<C: HttpClient + 'static>(self, client: C) -> PipelineBuilder<C> {
        PipelineBuilder {
            connection_string: self.connection_string,
            client,
            config: self.config,
            sampler: self.sampler,
            listener: self.listener,
        }
    }
}

impl<C> PipelineBuilder<C> {
    /// Set batching, retry, spool and context settings.
    pub fn with_config(mut self, config: TelemetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the sampling processor.
    ///
    /// Default: keep everything.
    ///
    /// ```
    /// # let builder = application_insights::new_pipeline_from_connection_string("InstrumentationKey=...").unwrap();
    /// let builder = builder.with_sampler(application_insights::sampling::FixedRateSampler::new(25.0));
    /// ```
    pub fn with_sampler(mut self, sampler: impl SamplingProcessor + 'static) -> Self {
        self.sampler = Arc::new(sampler);
        self
    }

    /// Receive dropped items, failed transmissions and other problems the client cannot report
    /// to the caller.
    pub fn with_diagnostic_listener(mut self, listener: impl DiagnosticListener + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }
}

impl<C: HttpClient + 'static> PipelineBuilder<C> {
    /// Start the client. Has to be called within a Tokio runtime.
    pub fn build(self) -> Result<TelemetryClient, Error> {
        let endpoint = append_path(self.connection_string.ingestion_endpoint(), "v2.1/track")
            .map_err(|err| Error::Config(format!("invalid ingestion endpoint: {}", err)))?;
        TelemetryClient::start(
            self.connection_string.instrumentation_key(),
            endpoint,
            self.client,
            self.config,
            self.sampler,
            Diagnostics::new(self.listener),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connection_string::ParseError, test_util::RecordingClient};
    use std::time::Duration;

    #[test]
    fn invalid_connection_string() {
        let err = new_pipeline_from_connection_string("IngestionEndpoint=https://in.example")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConnectionString(ParseError::MissingInstrumentationKey)
        ));
    }

    #[test]
    fn build_requires_a_runtime() {
        let err = new_pipeline_from_connection_string("InstrumentationKey=ikey")
            .unwrap()
            .with_client(RecordingClient::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::NoRuntime));
    }

    #[tokio::test(start_paused = true)]
    async fn sends_to_track_endpoint() {
        let http_client = RecordingClient::new();
        let client = new_pipeline_from_connection_string(
            "InstrumentationKey=ikey;IngestionEndpoint=https://westeurope.in.example/",
        )
        .unwrap()
        .with_client(http_client.clone())
        .build()
        .unwrap();
        client.track_event("started");
        let report = client.close(Duration::from_secs(1)).await;
        assert!(report.completed);
        let requests = http_client.requests();
        assert_eq!(1, requests.len());
        assert_eq!("https://westeurope.in.example/v2.1/track", requests[0].uri);
        assert_eq!("ikey", requests[0].items[0]["iKey"]);
    }
}
