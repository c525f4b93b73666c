//! Distributed-trace correlation.
//!
//! A [`CorrelationContext`] identifies one unit of work (span) within an operation (trace). It can
//! be rendered to and parsed from the W3C `traceparent` header and the legacy hierarchical
//! `Request-Id` header. See [`propagation`] for moving contexts across HTTP boundaries and through
//! async code.

pub(crate) mod id;
pub mod propagation;

use crate::Error;
use opentelemetry::trace::{SpanId, TraceFlags, TraceId};

const TRACEPARENT_VERSION: &str = "00";

/// Trace and span identity of the current unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    trace_flags: TraceFlags,
    trace_state: Option<String>,
    operation_name: String,
}

impl CorrelationContext {
    /// Start a new operation: fresh trace and span ids, no parent, flags `00`.
    pub fn new_root() -> Self {
        CorrelationContext {
            trace_id: id::new_trace_id(),
            span_id: id::new_span_id(),
            parent_span_id: None,
            trace_flags: TraceFlags::default(),
            trace_state: None,
            operation_name: String::new(),
        }
    }

    /// A child of `parent`, or a new root when there is no parent.
    pub fn new_child(parent: Option<&CorrelationContext>) -> Self {
        match parent {
            Some(parent) => parent.child(),
            None => Self::new_root(),
        }
    }

    /// A child of this context. It inherits trace id, flags, trace state and operation name, gets
    /// a fresh span id and records this context's span id as its parent.
    pub fn child(&self) -> Self {
        let mut span_id = id::new_span_id();
        while span_id == self.span_id {
            span_id = id::new_span_id();
        }
        CorrelationContext {
            trace_id: self.trace_id,
            span_id,
            parent_span_id: Some(self.span_id),
            trace_flags: self.trace_flags,
            trace_state: self.trace_state.clone(),
            operation_name: self.operation_name.clone(),
        }
    }

    /// Set the operation name, e.g. `GET /orders`.
    pub fn with_operation_name(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = operation_name.into();
        self
    }

    /// Set the `tracestate` value forwarded with this context.
    pub fn with_trace_state(mut self, trace_state: impl Into<String>) -> Self {
        let trace_state = trace_state.into();
        self.trace_state = Some(trace_state).filter(|s| !s.trim().is_empty());
        self
    }

    /// Set the trace flags.
    pub fn with_trace_flags(mut self, trace_flags: TraceFlags) -> Self {
        self.trace_flags = trace_flags;
        self
    }

    /// The operation id. Never zero.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Id of this unit of work. Never zero.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Span id of the parent unit of work, if any.
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    /// W3C trace flags.
    pub fn trace_flags(&self) -> TraceFlags {
        self.trace_flags
    }

    /// The `tracestate` value, forwarded verbatim.
    pub fn trace_state(&self) -> Option<&str> {
        self.trace_state.as_deref()
    }

    /// The operation name, empty if unset.
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// Render as a W3C `traceparent` value: `00-<trace_id>-<span_id>-<flags>`.
    pub fn to_w3c(&self) -> String {
        format!(
            "{}-{}-{}-{:02x}",
            TRACEPARENT_VERSION,
            self.trace_id,
            self.span_id,
            self.trace_flags.to_u8()
        )
    }

    /// Parse a W3C `traceparent` value.
    ///
    /// Parsing is strict: exactly four dash-separated parts, version `00`, lowercase hex ids of the
    /// right length that are not all zeros, and two hex digits of flags. The parsed span id becomes
    /// this context's span id; use [`CorrelationContext::child`] to continue the trace.
    pub fn parse_w3c(value: &str) -> Result<Self, Error> {
        let malformed = |reason| Error::MalformedHeader {
            header: propagation::TRACEPARENT_HEADER,
            reason,
        };
        let parts: Vec<&str> = value.trim().split('-').collect();
        if parts.len() != 4 {
            return Err(malformed("expected 4 parts"));
        }
        if parts[0] != TRACEPARENT_VERSION {
            return Err(malformed("unsupported version"));
        }
        if !is_lower_hex(parts[1], 32) {
            return Err(malformed("trace id is not 32 lowercase hex chars"));
        }
        if !is_lower_hex(parts[2], 16) {
            return Err(malformed("span id is not 16 lowercase hex chars"));
        }
        if !is_lower_hex(parts[3], 2) {
            return Err(malformed("flags are not 2 hex chars"));
        }

        let trace_id =
            TraceId::from_hex(parts[1]).map_err(|_| malformed("trace id is not hex"))?;
        let span_id = SpanId::from_hex(parts[2]).map_err(|_| malformed("span id is not hex"))?;
        let flags = u8::from_str_radix(parts[3], 16).map_err(|_| malformed("flags are not hex"))?;
        if trace_id == TraceId::INVALID {
            return Err(malformed("trace id is zero"));
        }
        if span_id == SpanId::INVALID {
            return Err(malformed("span id is zero"));
        }

        Ok(CorrelationContext {
            trace_id,
            span_id,
            parent_span_id: None,
            trace_flags: TraceFlags::new(flags),
            trace_state: None,
            operation_name: String::new(),
        })
    }

    /// Render as a legacy hierarchical `Request-Id` value: `|<trace_id>.<span_id>.`.
    pub fn to_legacy(&self) -> String {
        format!("|{}.{}.", self.trace_id, self.span_id)
    }

    /// Parse a legacy `Request-Id` value.
    ///
    /// When the first two components are a 32-hex trace id and a 16-hex span id they are adopted.
    /// Any other non-empty value yields a freshly synthesized context. Fails only on empty input.
    pub fn parse_legacy(value: &str) -> Result<Self, Error> {
        let trimmed = value.trim().trim_matches(|c| c == '|' || c == '.');
        if trimmed.is_empty() {
            return Err(Error::MalformedHeader {
                header: propagation::REQUEST_ID_HEADER,
                reason: "empty",
            });
        }

        let mut components = trimmed.split('.');
        let adopted = match (components.next(), components.next()) {
            (Some(trace_id), Some(span_id))
                if is_lower_hex(trace_id, 32) && is_lower_hex(span_id, 16) =>
            {
                TraceId::from_hex(trace_id)
                    .ok()
                    .zip(SpanId::from_hex(span_id).ok())
                    .filter(|(t, s)| *t != TraceId::INVALID && *s != SpanId::INVALID)
            }
            _ => None,
        };

        Ok(match adopted {
            Some((trace_id, span_id)) => CorrelationContext {
                trace_id,
                span_id,
                parent_span_id: None,
                trace_flags: TraceFlags::default(),
                trace_state: None,
                operation_name: String::new(),
            },
            None => {
                tracing::debug!(request_id = value, "synthesizing context for legacy request id");
                Self::new_root()
            }
        })
    }

    /// Parse a legacy `Request-Id` value and return a child of it.
    pub fn child_from_legacy(value: &str) -> Result<Self, Error> {
        Self::parse_legacy(value).map(|parent| parent.child())
    }
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
