use crate::{
    client::TelemetryClient,
    correlation::{propagation, CorrelationContext},
    telemetry::RemoteDependencyTelemetry,
};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use opentelemetry_http::{HeaderInjector, HttpClient, HttpError};
use std::time::Instant;

/// An [`HttpClient`] that tracks every call as an HTTP dependency.
///
/// Each request gets a child of the ambient correlation context: its `traceparent`, `Request-Id`
/// and `tracestate` headers are set, and the resulting dependency item is parented to the ambient
/// operation. Without an ambient context every call starts a new operation.
///
/// Do not use a tracked client as the transport of the [`TelemetryClient`] itself.
#[derive(Debug, Clone)]
pub struct TrackedHttpClient<C> {
    inner: C,
    telemetry: TelemetryClient,
}

impl<C> TrackedHttpClient<C> {
    /// Wrap `inner`, reporting calls to `telemetry`.
    pub fn new(inner: C, telemetry: TelemetryClient) -> Self {
        Self { inner, telemetry }
    }

    /// The wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for TrackedHttpClient<C> {
    async fn send_bytes(&self, mut request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        let context = CorrelationContext::new_child(propagation::current().as_ref());
        propagation::inject(&context, &mut HeaderInjector(request.headers_mut()));

        let uri = request.uri();
        let name = format!("{} {}", request.method(), uri.path());
        let target = uri
            .authority()
            .map(|authority| authority.as_str().to_string())
            .unwrap_or_default();
        let data = self.telemetry.sanitize_url(&uri.to_string());

        let started = Instant::now();
        let result = self.inner.send_bytes(request).await;
        let duration = started.elapsed();

        let (result_code, success) = match &result {
            Ok(response) => (
                response.status().as_u16().to_string(),
                response.status().as_u16() < 400,
            ),
            Err(_) => (String::from("0"), false),
        };
        let mut dependency =
            RemoteDependencyTelemetry::new(name, "HTTP", target, duration, result_code, success);
        dependency.data = Some(data);
        self.telemetry
            .track_with_context(dependency, Some(&context));

        result
    }
}

#[cfg(any(feature = "reqwest-client", feature = "reqwest-client-rustls"))]
mod reqwest_transport {
    use super::{async_trait, Bytes, HttpClient, HttpError, Request, Response};

    /// Ingestion transport over [`reqwest::Client`].
    ///
    /// The [`HttpClient`] impl of `reqwest::Client` itself reports every 4xx and 5xx response as
    /// an error without its headers, so a `Retry-After` sent with a throttled or failed response
    /// is lost. This client returns every response as it was received.
    ///
    /// ```no_run
    /// # fn run() -> Result<(), application_insights::Error> {
    /// use application_insights::{new_pipeline_from_connection_string, ReqwestClient};
    ///
    /// let client = new_pipeline_from_connection_string(
    ///     "InstrumentationKey=0fdcec70-0ce5-4085-89d9-9ae8ead9af66",
    /// )?
    /// .with_client(ReqwestClient::default())
    /// .build()?;
    /// # Ok(())
    /// # }
    /// ```
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestClient(reqwest::Client);

    impl ReqwestClient {
        /// Send through `client`.
        pub fn new(client: reqwest::Client) -> Self {
            Self(client)
        }
    }

    impl From<reqwest::Client> for ReqwestClient {
        fn from(client: reqwest::Client) -> Self {
            Self(client)
        }
    }

    #[async_trait]
    impl HttpClient for ReqwestClient {
        async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            let request: reqwest::Request = request.try_into()?;
            let mut response = self.0.execute(request).await?;
            let headers = std::mem::take(response.headers_mut());
            let mut http_response = Response::builder()
                .status(response.status())
                .body(response.bytes().await?)?;
            *http_response.headers_mut() = headers;
            Ok(http_response)
        }
    }
}

#[cfg(any(feature = "reqwest-client", feature = "reqwest-client-rustls"))]
pub use reqwest_transport::ReqwestClient;
