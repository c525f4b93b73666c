//! A telemetry client for [Azure Application Insights].
//!
//! [Azure Application Insights]: https://docs.microsoft.com/en-us/azure/azure-monitor/app/app-insights-overview
//!
//! **Disclaimer**: This is not an official Microsoft product.
//!
//! # Usage
//!
//! Create a client from a connection string and an HTTP client. The client has to be created
//! within a Tokio runtime; it spawns a background task that batches and sends telemetry.
//!
//! ```no_run
//! # async fn run(http_client: impl opentelemetry_http::HttpClient + 'static) -> Result<(), application_insights::Error> {
//! use application_insights::{new_pipeline_from_connection_string, SeverityLevel};
//! use std::time::Duration;
//!
//! // With the `reqwest-client` feature, `http_client` can be a `ReqwestClient`.
//! let client = new_pipeline_from_connection_string(
//!     "InstrumentationKey=0fdcec70-0ce5-4085-89d9-9ae8ead9af66",
//! )?
//! .with_client(http_client)
//! .build()?;
//!
//! client.track_event("started");
//! client.track_trace("cache warmed", SeverityLevel::Information);
//! client.track_metric("queue_length", 3.0);
//!
//! // Send what is pending before the process exits.
//! client.close(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```
//!
//! Tracking calls never block, fail or panic. Problems in the background (dropped items, failed
//! transmissions, throttling) are logged with [`tracing`], counted in [`ChannelStats`] and
//! reported to an optional [`DiagnosticListener`].
//!
//! # Correlation
//!
//! Every item belongs to an operation. Items tracked within
//! [`correlation::propagation::scope`] are correlated with the scope's [`CorrelationContext`]:
//!
//! | Envelope tag            | Value                                  |
//! | ----------------------- | -------------------------------------- |
//! | `ai.operation.id`       | Trace id                               |
//! | `ai.operation.parentId` | Parent span id                         |
//! | `ai.operation.name`     | Operation name, e.g. `GET /orders`     |
//!
//! Requests and dependencies use the context's span id as their id. Items tracked without a
//! context start a new operation.
//!
//! [`RequestTrackingLayer`] does this for HTTP servers built on `tower`: it reads `traceparent`
//! (or the legacy `Request-Id`) from incoming requests and tracks a request item for each of
//! them. [`TrackedHttpClient`] does the same for outgoing calls: it writes the headers and tracks
//! a dependency item.
//!
//! # Sampling
//!
//! A [`sampling::SamplingProcessor`] decides which items are sent. Decisions hash the operation id,
//! so an operation is kept or dropped as a whole. Kept items carry the inverse of their keep
//! probability as `sampleRate`. See the [`sampling`] module for fixed, per-type, adaptive and
//! rule-based processors.
//!
//! # Delivery
//!
//! Items are sent in batches of up to [`TelemetryConfig::with_max_batch_size`] items or every
//! [`TelemetryConfig::with_max_batch_interval`]. The ingestion response decides what happens to
//! a batch:
//!
//! | Response                  | Result                                                   |
//! | ------------------------- | -------------------------------------------------------- |
//! | `200`                     | Sent                                                     |
//! | `206`                     | Items failing with 408, 429, 500 or 503 are sent again   |
//! | `429`, `439`              | Sending pauses until `Retry-After`                       |
//! | `408`, `5xx`, no response | Sent again after a backoff, or after `Retry-After`       |
//! | other                     | Dropped                                                  |
//!
//! [`TelemetryClient::close`] sends what is pending within a timeout. What could not be sent is
//! written to [`TelemetryConfig::with_spool_dir`] and can be sent by the next process
//! ([`TelemetryConfig::with_reload_spool`]).
#![doc(html_root_url = "https://docs.rs/application-insights/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs, unreachable_pub, missing_debug_implementations)]

mod assembler;
mod channel;
mod client;
mod config;
mod connection_string;
mod convert;
pub mod correlation;
mod diagnostics;
mod error;
mod http_client;
mod middleware;
mod models;
mod pipeline;
mod redact;
pub mod sampling;
mod tags;
mod telemetry;
#[cfg(test)]
mod test_util;
mod uploader;

pub use channel::CloseReport;
pub use client::TelemetryClient;
pub use config::TelemetryConfig;
pub use connection_string::{ConnectionString, ParseError};
pub use correlation::CorrelationContext;
pub use diagnostics::{ChannelStats, Diagnostic, DiagnosticListener, DropReason};
pub use error::Error;
pub use http_client::TrackedHttpClient;
#[cfg(any(feature = "reqwest-client", feature = "reqwest-client-rustls"))]
#[cfg_attr(
    docsrs,
    doc(cfg(any(feature = "reqwest-client", feature = "reqwest-client-rustls")))
)]
pub use http_client::ReqwestClient;
pub use middleware::{RequestTracking, RequestTrackingLayer, ResponseFuture};
pub use models::context_tag_keys as tag_keys;
pub use models::{Envelope, SeverityLevel};
pub use pipeline::{new_pipeline_from_connection_string, new_pipeline_from_env, PipelineBuilder};
pub use telemetry::{
    AvailabilityTelemetry, EventTelemetry, ExceptionInfo, ExceptionTelemetry, MetricAggregation,
    MetricTelemetry, PageViewTelemetry, RemoteDependencyTelemetry, RequestTelemetry, StackFrame,
    Telemetry, TelemetryCommon, TelemetryKind, TraceTelemetry,
};
