use crate::{
    models::{Envelope, SeverityLevel},
    sampling::{clamp_rate, SamplingProcessor},
    TelemetryKind,
};
use std::{
    cmp::Reverse,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

/// Priority of the built-in rule that keeps every failure.
pub const ERROR_PRIORITY: i32 = 1000;

type Predicate = dyn Fn(&Envelope) -> bool + Send + Sync;

/// A predicate with the rate applied to the envelopes it matches.
#[derive(Clone)]
pub struct SamplingRule {
    name: String,
    priority: i32,
    rate: f64,
    predicate: Arc<Predicate>,
}

impl SamplingRule {
    /// Create a rule.
    pub fn new<F>(name: impl Into<String>, priority: i32, rate: f64, predicate: F) -> Self
    where
        F: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority,
            rate: clamp_rate(rate),
            predicate: Arc::new(predicate),
        }
    }

    /// A rule matching every envelope of one kind.
    pub fn for_kind(name: impl Into<String>, priority: i32, rate: f64, kind: TelemetryKind) -> Self {
        Self::new(name, priority, rate, move |envelope| {
            envelope.kind() == Some(kind)
        })
    }

    /// Keeps all failures: exceptions, requests answered with 4xx or 5xx, failed dependencies and
    /// traces of severity error or critical.
    pub fn error_priority() -> Self {
        Self::new("error-priority", ERROR_PRIORITY, 100.0, is_failure)
    }

    /// Rule name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Higher priorities are evaluated first.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Rate applied to matching envelopes.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Whether the rule applies to `envelope`.
    pub fn matches(&self, envelope: &Envelope) -> bool {
        (self.predicate)(envelope)
    }
}

impl fmt::Debug for SamplingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplingRule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("rate", &self.rate)
            .finish_non_exhaustive()
    }
}

fn is_failure(envelope: &Envelope) -> bool {
    match envelope.kind() {
        Some(TelemetryKind::Exception) => true,
        Some(TelemetryKind::Request) => envelope
            .response_code()
            .map_or(false, |code| code.starts_with('4') || code.starts_with('5')),
        Some(TelemetryKind::RemoteDependency) => {
            envelope.success() == Some(false)
                || envelope.response_code().map_or(false, is_http_error_code)
        }
        Some(TelemetryKind::Trace) => matches!(
            envelope.severity_level(),
            Some(SeverityLevel::Error | SeverityLevel::Critical)
        ),
        _ => false,
    }
}

fn is_http_error_code(code: &str) -> bool {
    code.len() == 3
        && code.bytes().all(|b| b.is_ascii_digit())
        && (code.starts_with('4') || code.starts_with('5'))
}

/// Picks a sampling rate from an ordered list of rules.
///
/// Rules are evaluated by descending priority; rules of equal priority keep the order they were
/// added in. The first match decides the rate. Without a match the default rate applies.
#[derive(Debug)]
pub struct RuleEngine {
    rules: RwLock<Vec<SamplingRule>>,
    default_rate: f64,
}

impl RuleEngine {
    /// Create an engine with the built-in error-priority rule.
    pub fn new(default_rate: f64) -> Self {
        Self::without_rules(default_rate).with_rule(SamplingRule::error_priority())
    }

    /// Create an engine without any rules.
    pub fn without_rules(default_rate: f64) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            default_rate: clamp_rate(default_rate),
        }
    }

    /// Add a rule.
    pub fn with_rule(self, rule: SamplingRule) -> Self {
        self.add_rule(rule);
        self
    }

    /// Add a rule to an engine in use.
    pub fn add_rule(&self, rule: SamplingRule) {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        rules.push(rule);
        rules.sort_by_key(|rule| Reverse(rule.priority));
    }

    /// The rate of the highest-priority matching rule, or the default rate.
    pub fn rate_for(&self, envelope: &Envelope) -> f64 {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        rules
            .iter()
            .find(|rule| rule.matches(envelope))
            .map(|rule| rule.rate)
            .unwrap_or(self.default_rate)
    }
}

/// Rule-based sampling with deterministic per-operation decisions.
///
/// The [`RuleEngine`] picks the rate; the hash test on the operation id makes the decision, so
/// correlated items sampled at the same rate share their fate.
#[derive(Debug)]
pub struct IntelligentSampler {
    engine: RuleEngine,
}

impl IntelligentSampler {
    /// Create a sampler from a rule engine.
    pub fn new(engine: RuleEngine) -> Self {
        Self { engine }
    }

    /// The underlying rule engine, e.g. to add rules later.
    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }
}

impl SamplingProcessor for IntelligentSampler {
    fn sampling_rate(&self, envelope: &Envelope) -> f64 {
        self.engine.rate_for(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Data, ExceptionData, MessageData, RemoteDependencyData, RequestData,
    };
    use crate::sampling::tests::envelope;
    use test_case::test_case;

    fn with_data(kind: &str, data: Data) -> Envelope {
        Envelope {
            data,
            ..envelope(kind, Some("op"))
        }
    }

    fn request(code: &str) -> Envelope {
        with_data(
            "Request",
            Data::Request(RequestData {
                ver: 2,
                id: "0123456789abcdef".into(),
                source: None,
                name: None,
                duration: "0.00:00:00.000000".into(),
                response_code: code.into(),
                success: true,
                url: None,
                properties: None,
                measurements: None,
            }),
        )
    }

    fn dependency(code: &str, success: bool) -> Envelope {
        with_data(
            "RemoteDependency",
            Data::RemoteDependency(RemoteDependencyData {
                ver: 2,
                name: "GET /".into(),
                id: None,
                result_code: Some(code.into()),
                duration: "0.00:00:00.000000".into(),
                success: Some(success),
                data: None,
                target: None,
                type_: None,
                properties: None,
                measurements: None,
            }),
        )
    }

    fn trace(severity: SeverityLevel) -> Envelope {
        with_data(
            "Message",
            Data::Message(MessageData {
                ver: 2,
                message: "m".into(),
                severity_level: Some(severity),
                properties: None,
                measurements: None,
            }),
        )
    }

    fn exception() -> Envelope {
        with_data(
            "Exception",
            Data::Exception(ExceptionData {
                ver: 2,
                exceptions: Vec::new(),
                severity_level: None,
                properties: None,
                measurements: None,
            }),
        )
    }

    #[test_case(request("500"), true ; "request 500")]
    #[test_case(request("404"), true ; "request 404")]
    #[test_case(request("200"), false ; "request 200")]
    #[test_case(dependency("200", false), true ; "dependency failed")]
    #[test_case(dependency("503", true), true ; "dependency 503")]
    #[test_case(dependency("200", true), false ; "dependency ok")]
    #[test_case(dependency("4000", true), false ; "dependency non http code")]
    #[test_case(trace(SeverityLevel::Critical), true ; "trace critical")]
    #[test_case(trace(SeverityLevel::Error), true ; "trace error")]
    #[test_case(trace(SeverityLevel::Warning), false ; "trace warning")]
    #[test_case(exception(), true ; "exception")]
    #[test_case(envelope("Event", None), false ; "event")]
    fn error_priority_rule(envelope: Envelope, expected: bool) {
        assert_eq!(expected, SamplingRule::error_priority().matches(&envelope));
    }

    #[test]
    fn highest_priority_match_wins() {
        let engine = RuleEngine::new(10.0)
            .with_rule(SamplingRule::for_kind("requests", 10, 50.0, TelemetryKind::Request))
            .with_rule(SamplingRule::new("all", 1, 20.0, |_| true));
        assert_eq!(100.0, engine.rate_for(&request("500")));
        assert_eq!(50.0, engine.rate_for(&request("200")));
        assert_eq!(20.0, engine.rate_for(&envelope("Event", None)));
    }

    #[test]
    fn default_rate_without_match() {
        let engine = RuleEngine::without_rules(30.0);
        assert_eq!(30.0, engine.rate_for(&request("500")));
    }

    #[test]
    fn equal_priorities_keep_insertion_order() {
        let engine = RuleEngine::without_rules(0.0)
            .with_rule(SamplingRule::new("first", 5, 40.0, |_| true))
            .with_rule(SamplingRule::new("second", 5, 60.0, |_| true));
        assert_eq!(40.0, engine.rate_for(&envelope("Event", None)));
    }

    #[test]
    fn intelligent_sampler_keeps_failures() {
        let sampler = IntelligentSampler::new(RuleEngine::new(0.0));
        let mut failed = request("503");
        assert!(sampler.should_sample(&mut failed));
        assert_eq!(1.0, failed.sample_rate());
        let mut ok = request("200");
        assert!(!sampler.should_sample(&mut ok));
    }

    #[test]
    fn intelligent_sampler_is_consistent_per_operation() {
        let sampler = IntelligentSampler::new(RuleEngine::new(30.0));
        for i in 0..200 {
            let id = format!("op-{}", i);
            let mut a = Envelope {
                tags: [(crate::tag_keys::OPERATION_ID.to_string(), id.clone())].into(),
                ..request("200")
            };
            let mut b = Envelope {
                tags: [(crate::tag_keys::OPERATION_ID.to_string(), id)].into(),
                ..envelope("Event", None)
            };
            assert_eq!(sampler.should_sample(&mut a), sampler.should_sample(&mut b));
        }
    }
}
