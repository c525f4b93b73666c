//! Telemetry items applications track.
//!
//! Every item carries [`TelemetryCommon`]: a timestamp, custom properties and measurements,
//! context tag overrides and an optional item id. The kind-specific fields are public so items
//! can be built with struct literals as well as with the `new` constructors.

use crate::models::SeverityLevel;
use std::{
    collections::BTreeMap,
    error::Error as StdError,
    time::{Duration, SystemTime},
};

/// Kind of a telemetry item. Determines the last segment of the envelope name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TelemetryKind {
    /// Custom event.
    Event,
    /// Metric measurement.
    Metric,
    /// Trace message with severity.
    Trace,
    /// Incoming request handled by the application.
    Request,
    /// Outgoing call to a remote component.
    RemoteDependency,
    /// Handled or unhandled error.
    Exception,
    /// Result of an availability test.
    Availability,
    /// Page view.
    PageView,
}

impl TelemetryKind {
    /// All kinds, in declaration order.
    pub const ALL: [TelemetryKind; 8] = [
        TelemetryKind::Event,
        TelemetryKind::Metric,
        TelemetryKind::Trace,
        TelemetryKind::Request,
        TelemetryKind::RemoteDependency,
        TelemetryKind::Exception,
        TelemetryKind::Availability,
        TelemetryKind::PageView,
    ];

    /// The segment used in envelope names, e.g. `Message` for traces.
    pub fn name_segment(&self) -> &'static str {
        match self {
            TelemetryKind::Event => "Event",
            TelemetryKind::Metric => "Metric",
            TelemetryKind::Trace => "Message",
            TelemetryKind::Request => "Request",
            TelemetryKind::RemoteDependency => "RemoteDependency",
            TelemetryKind::Exception => "Exception",
            TelemetryKind::Availability => "Availability",
            TelemetryKind::PageView => "PageView",
        }
    }

    pub(crate) fn from_name_segment(segment: &str) -> Option<Self> {
        TelemetryKind::ALL
            .into_iter()
            .find(|kind| kind.name_segment() == segment)
    }
}

/// Fields shared by every telemetry item.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryCommon {
    /// When the item happened. Defaults to the time the item was created.
    pub timestamp: SystemTime,
    /// Custom properties.
    pub properties: BTreeMap<String, String>,
    /// Custom measurements.
    pub measurements: BTreeMap<String, f64>,
    /// Context tag overrides, keyed by the names in [`crate::tag_keys`].
    pub tags: BTreeMap<String, String>,
    /// Explicit item id. Requests, dependencies and availability results otherwise use the span id
    /// of their correlation context or a fresh id.
    pub id: Option<String>,
}

impl Default for TelemetryCommon {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            properties: BTreeMap::new(),
            measurements: BTreeMap::new(),
            tags: BTreeMap::new(),
            id: None,
        }
    }
}

/// A custom event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTelemetry {
    /// Event name.
    pub name: String,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl EventTelemetry {
    /// Create an event with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            common: TelemetryCommon::default(),
        }
    }
}

/// Pre-aggregated statistics of a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricAggregation {
    /// Number of measurements.
    pub count: i32,
    /// Smallest measurement.
    pub min: f64,
    /// Largest measurement.
    pub max: f64,
    /// Standard deviation of the measurements.
    pub std_dev: f64,
}

/// A metric value.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricTelemetry {
    /// Metric name.
    pub name: String,
    /// Optional metric namespace.
    pub namespace: Option<String>,
    /// The measurement, or the sum of measurements when aggregated.
    pub value: f64,
    /// Aggregation statistics, when `value` is a sum.
    pub aggregation: Option<MetricAggregation>,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl MetricTelemetry {
    /// Create a single measurement.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            value,
            aggregation: None,
            common: TelemetryCommon::default(),
        }
    }
}

/// A trace message.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceTelemetry {
    /// Message text.
    pub message: String,
    /// Severity.
    pub severity: SeverityLevel,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl TraceTelemetry {
    /// Create a trace message.
    pub fn new(message: impl Into<String>, severity: SeverityLevel) -> Self {
        Self {
            message: message.into(),
            severity,
            common: TelemetryCommon::default(),
        }
    }
}

/// An incoming request handled by the application.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTelemetry {
    /// Request name. Defaults to `METHOD path`.
    pub name: String,
    /// HTTP method.
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Time it took to handle the request.
    pub duration: Duration,
    /// Response status code.
    pub response_code: String,
    /// Whether the request succeeded.
    pub success: bool,
    /// Source of the request, e.g. the caller's role.
    pub source: Option<String>,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl RequestTelemetry {
    /// Create a request. Success is derived from the status code (`< 400`).
    pub fn new(
        method: impl Into<String>,
        url: impl Into<String>,
        duration: Duration,
        response_code: u16,
    ) -> Self {
        let method = method.into();
        let url = url.into();
        let path = url::Url::parse(&url)
            .map(|url| url.path().to_string())
            .unwrap_or_else(|_| url.split('?').next().unwrap_or_default().to_string());
        Self {
            name: format!("{} {}", method, path),
            method,
            url,
            duration,
            response_code: response_code.to_string(),
            success: response_code < 400,
            source: None,
            common: TelemetryCommon::default(),
        }
    }
}

/// An outgoing call to a remote component.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDependencyTelemetry {
    /// Name of the call, e.g. `GET /path`.
    pub name: String,
    /// Dependency type, e.g. `HTTP` or `SQL`.
    pub dependency_type: String,
    /// Target of the call, e.g. the host name.
    pub target: String,
    /// Command of the call, e.g. the URL or SQL statement.
    pub data: Option<String>,
    /// Time the call took.
    pub duration: Duration,
    /// Result code, e.g. the HTTP status code.
    pub result_code: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl RemoteDependencyTelemetry {
    /// Create a dependency call.
    pub fn new(
        name: impl Into<String>,
        dependency_type: impl Into<String>,
        target: impl Into<String>,
        duration: Duration,
        result_code: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            name: name.into(),
            dependency_type: dependency_type.into(),
            target: target.into(),
            data: None,
            duration,
            result_code: result_code.into(),
            success,
            common: TelemetryCommon::default(),
        }
    }
}

/// One frame of an exception's stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Position in the stack, 0 for the innermost frame.
    pub level: u32,
    /// Function name.
    pub method: String,
    /// Crate or module containing the function.
    pub assembly: Option<String>,
    /// Source file.
    pub file_name: Option<String>,
    /// Source line.
    pub line: Option<u32>,
}

/// One error in an exception chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    /// Error type name.
    pub type_name: String,
    /// Error message.
    pub message: String,
    /// Stack as text.
    pub stack: Option<String>,
    /// Parsed stack frames.
    pub frames: Vec<StackFrame>,
}

/// A handled or unhandled error.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionTelemetry {
    /// The error chain, outermost first.
    pub exceptions: Vec<ExceptionInfo>,
    /// Severity.
    pub severity: Option<SeverityLevel>,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl ExceptionTelemetry {
    /// Create an exception with a single error.
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exceptions: vec![ExceptionInfo {
                type_name: type_name.into(),
                message: message.into(),
                stack: None,
                frames: Vec::new(),
            }],
            severity: Some(SeverityLevel::Error),
            common: TelemetryCommon::default(),
        }
    }

    /// Create an exception from an error and its chain of sources.
    pub fn from_error<E: StdError + ?Sized>(error: &E) -> Self {
        let mut exceptions = vec![ExceptionInfo {
            type_name: type_name_from_debug(&format!("{:?}", error)),
            message: error.to_string(),
            stack: None,
            frames: Vec::new(),
        }];
        let mut source = error.source();
        while let Some(inner) = source {
            exceptions.push(ExceptionInfo {
                type_name: type_name_from_debug(&format!("{:?}", inner)),
                message: inner.to_string(),
                stack: None,
                frames: Vec::new(),
            });
            source = inner.source();
        }
        Self {
            exceptions,
            severity: Some(SeverityLevel::Error),
            common: TelemetryCommon::default(),
        }
    }

    /// Attach stack frames to the outermost error.
    pub fn with_frames(mut self, frames: Vec<StackFrame>) -> Self {
        if let Some(outer) = self.exceptions.first_mut() {
            outer.frames = frames;
        }
        self
    }

    /// Attach a textual stack, e.g. a captured `std::backtrace::Backtrace`, to the outermost
    /// error.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        if let Some(outer) = self.exceptions.first_mut() {
            outer.stack = Some(stack.into());
        }
        self
    }
}

// Debug output of most errors starts with the type or variant name.
fn type_name_from_debug(debug: &str) -> String {
    let name: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    if name.is_empty() {
        "Error".into()
    } else {
        name
    }
}

/// Result of an availability test.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityTelemetry {
    /// Test name.
    pub name: String,
    /// Test duration.
    pub duration: Duration,
    /// Whether the test passed.
    pub success: bool,
    /// Where the test ran.
    pub run_location: Option<String>,
    /// Diagnostic message.
    pub message: Option<String>,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl AvailabilityTelemetry {
    /// Create an availability result.
    pub fn new(name: impl Into<String>, duration: Duration, success: bool) -> Self {
        Self {
            name: name.into(),
            duration,
            success,
            run_location: None,
            message: None,
            common: TelemetryCommon::default(),
        }
    }
}

/// A page view.
#[derive(Debug, Clone, PartialEq)]
pub struct PageViewTelemetry {
    /// Page name.
    pub name: String,
    /// Page URL.
    pub url: Option<String>,
    /// Time the page took to load.
    pub duration: Option<Duration>,
    /// Shared fields.
    pub common: TelemetryCommon,
}

impl PageViewTelemetry {
    /// Create a page view.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            duration: None,
            common: TelemetryCommon::default(),
        }
    }
}

/// Any telemetry item.
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    /// See [`EventTelemetry`].
    Event(EventTelemetry),
    /// See [`MetricTelemetry`].
    Metric(MetricTelemetry),
    /// See [`TraceTelemetry`].
    Trace(TraceTelemetry),
    /// See [`RequestTelemetry`].
    Request(RequestTelemetry),
    /// See [`RemoteDependencyTelemetry`].
    RemoteDependency(RemoteDependencyTelemetry),
    /// See [`ExceptionTelemetry`].
    Exception(ExceptionTelemetry),
    /// See [`AvailabilityTelemetry`].
    Availability(AvailabilityTelemetry),
    /// See [`PageViewTelemetry`].
    PageView(PageViewTelemetry),
}

impl Telemetry {
    /// The kind of this item.
    pub fn kind(&self) -> TelemetryKind {
        match self {
            Telemetry::Event(_) => TelemetryKind::Event,
            Telemetry::Metric(_) => TelemetryKind::Metric,
            Telemetry::Trace(_) => TelemetryKind::Trace,
            Telemetry::Request(_) => TelemetryKind::Request,
            Telemetry::RemoteDependency(_) => TelemetryKind::RemoteDependency,
            Telemetry::Exception(_) => TelemetryKind::Exception,
            Telemetry::Availability(_) => TelemetryKind::Availability,
            Telemetry::PageView(_) => TelemetryKind::PageView,
        }
    }

    /// Shared fields of this item.
    pub fn common(&self) -> &TelemetryCommon {
        match self {
            Telemetry::Event(item) => &item.common,
            Telemetry::Metric(item) => &item.common,
            Telemetry::Trace(item) => &item.common,
            Telemetry::Request(item) => &item.common,
            Telemetry::RemoteDependency(item) => &item.common,
            Telemetry::Exception(item) => &item.common,
            Telemetry::Availability(item) => &item.common,
            Telemetry::PageView(item) => &item.common,
        }
    }

    /// Mutable shared fields of this item.
    pub fn common_mut(&mut self) -> &mut TelemetryCommon {
        match self {
            Telemetry::Event(item) => &mut item.common,
            Telemetry::Metric(item) => &mut item.common,
            Telemetry::Trace(item) => &mut item.common,
            Telemetry::Request(item) => &mut item.common,
            Telemetry::RemoteDependency(item) => &mut item.common,
            Telemetry::Exception(item) => &mut item.common,
            Telemetry::Availability(item) => &mut item.common,
            Telemetry::PageView(item) => &mut item.common,
        }
    }
}

macro_rules! telemetry_item {
    ($($item:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$item> for Telemetry {
                fn from(item: $item) -> Self {
                    Telemetry::$variant(item)
                }
            }

            impl $item {
                /// Add a custom property.
                pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
                    self.common.properties.insert(key.into(), value.into());
                    self
                }

                /// Add a custom measurement.
                pub fn with_measurement(mut self, key: impl Into<String>, value: f64) -> Self {
                    self.common.measurements.insert(key.into(), value);
                    self
                }

                /// Override a context tag.
                pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
                    self.common.tags.insert(key.into(), value.into());
                    self
                }

                /// Set the time the item happened.
                pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
                    self.common.timestamp = timestamp;
                    self
                }

                /// Set an explicit item id.
                pub fn with_id(mut self, id: impl Into<String>) -> Self {
                    self.common.id = Some(id.into());
                    self
                }
            }
        )*
    };
}

telemetry_item! {
    EventTelemetry => Event,
    MetricTelemetry => Metric,
    TraceTelemetry => Trace,
    RequestTelemetry => Request,
    RemoteDependencyTelemetry => RemoteDependency,
    ExceptionTelemetry => Exception,
    AvailabilityTelemetry => Availability,
    PageViewTelemetry => PageView,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("https://example.com/hello/world?name=marry", "GET /hello/world" ; "absolute url")]
    #[test_case("/hello?name=marry", "GET /hello" ; "path only")]
    fn request_name(url: &str, expected: &str) {
        let request = RequestTelemetry::new("GET", url, Duration::from_millis(5), 200);
        assert_eq!(expected, request.name);
        assert!(request.success);
    }

    #[test_case(399, true)]
    #[test_case(400, false)]
    #[test_case(503, false)]
    fn request_success(status: u16, expected: bool) {
        let request = RequestTelemetry::new("GET", "/", Duration::ZERO, status);
        assert_eq!(expected, request.success);
    }

    #[test]
    fn kind_name_segments_round_trip() {
        for kind in TelemetryKind::ALL {
            assert_eq!(
                Some(kind),
                TelemetryKind::from_name_segment(kind.name_segment())
            );
        }
        assert_eq!(None, TelemetryKind::from_name_segment("Trace"));
    }

    #[test]
    fn exception_from_error_chain() {
        #[derive(Debug)]
        struct Outer(std::io::Error);
        impl std::fmt::Display for Outer {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("reading config failed")
            }
        }
        impl StdError for Outer {
            fn source(&self) -> Option<&(dyn StdError + 'static)> {
                Some(&self.0)
            }
        }

        let error = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"));
        let exception = ExceptionTelemetry::from_error(&error);
        assert_eq!(2, exception.exceptions.len());
        assert_eq!("Outer", exception.exceptions[0].type_name);
        assert_eq!("reading config failed", exception.exceptions[0].message);
        assert_eq!("disk on fire", exception.exceptions[1].message);
    }

    #[test]
    fn builder_methods_fill_common_fields() {
        let event: Telemetry = EventTelemetry::new("started")
            .with_property("region", "eu")
            .with_measurement("took", 1.5)
            .with_id("0123456789abcdef")
            .into();
        assert_eq!(TelemetryKind::Event, event.kind());
        assert_eq!(Some(&"eu".to_string()), event.common().properties.get("region"));
        assert_eq!(Some(&1.5), event.common().measurements.get("took"));
        assert_eq!(Some("0123456789abcdef"), event.common().id.as_deref());
    }
}
