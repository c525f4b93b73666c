//! Moving correlation contexts across HTTP boundaries and through async code.
//!
//! Headers are read and written through the OpenTelemetry [`Extractor`] and [`Injector`] traits,
//! so [`opentelemetry_http::HeaderExtractor`] and [`opentelemetry_http::HeaderInjector`] work with
//! `http::HeaderMap`s directly.
//!
//! The ambient context is a Tokio task-local. Code running inside [`scope`] (or [`sync_scope`])
//! sees the context through [`current`]; tracking calls without an explicit context use it.

use crate::correlation::CorrelationContext;
use opentelemetry::propagation::{Extractor, Injector};
use std::future::Future;
use tokio::task::futures::TaskLocalFuture;

/// W3C trace context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// W3C vendor state header, forwarded verbatim.
pub const TRACESTATE_HEADER: &str = "tracestate";
/// Legacy hierarchical request id header.
pub const REQUEST_ID_HEADER: &str = "request-id";

tokio::task_local! {
    static CURRENT: CorrelationContext;
}

/// Read the caller's context from request headers.
///
/// `traceparent` is preferred. A malformed `traceparent` is ignored and `Request-Id` is tried
/// instead. Returns `None` when neither header yields a context.
pub fn extract(extractor: &dyn Extractor) -> Option<CorrelationContext> {
    let trace_state = extractor
        .get(TRACESTATE_HEADER)
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let context = if let Some(traceparent) = extractor.get(TRACEPARENT_HEADER) {
        match CorrelationContext::parse_w3c(traceparent) {
            Ok(context) => Some(context),
            Err(err) => {
                tracing::debug!(error = %err, "ignoring malformed traceparent");
                None
            }
        }
    } else {
        None
    };

    let context = context.or_else(|| {
        extractor
            .get(REQUEST_ID_HEADER)
            .and_then(|request_id| CorrelationContext::parse_legacy(request_id).ok())
    })?;

    Some(match trace_state {
        Some(trace_state) => context.with_trace_state(trace_state),
        None => context,
    })
}

/// Write `traceparent`, `Request-Id` and, if present, `tracestate` for the given context.
pub fn inject(context: &CorrelationContext, injector: &mut dyn Injector) {
    injector.set(TRACEPARENT_HEADER, context.to_w3c());
    injector.set(REQUEST_ID_HEADER, context.to_legacy());
    if let Some(trace_state) = context.trace_state() {
        injector.set(TRACESTATE_HEADER, trace_state.to_string());
    }
}

/// The ambient context of the current task, if any.
pub fn current() -> Option<CorrelationContext> {
    CURRENT.try_with(Clone::clone).ok()
}

/// Run `future` with `context` as the ambient context.
pub fn scope<F: Future>(
    context: CorrelationContext,
    future: F,
) -> TaskLocalFuture<CorrelationContext, F> {
    CURRENT.scope(context, future)
}

/// Run `f` with `context` as the ambient context.
pub fn sync_scope<R>(context: CorrelationContext, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(context, f)
}
