use crate::{
    models::{context_tag_keys::OPERATION_ID, Data, LimitedLenString1024, SeverityLevel, Tags},
    TelemetryKind,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A telemetry item as it goes on the wire: the typed payload plus ingestion metadata.
///
/// Envelopes are created by the client. Sampling processors receive them before they are handed
/// to the channel; afterwards they are never mutated again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub(crate) name: LimitedLenString1024,
    pub(crate) time: String,
    pub(crate) sample_rate: f64,
    pub(crate) i_key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) tags: Tags,
    pub(crate) data: Data,
}

impl Envelope {
    /// Schema name, `Microsoft.ApplicationInsights.<ikey-no-dashes>.<Kind>`.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// RFC 3339 UTC timestamp.
    pub fn time(&self) -> &str {
        &self.time
    }

    /// Inverse of the probability that the item survived sampling.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Instrumentation key the item is attributed to.
    pub fn instrumentation_key(&self) -> &str {
        &self.i_key
    }

    /// Context tags, keyed by the names in [`crate::tag_keys`].
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// The operation id tag, if any.
    pub fn operation_id(&self) -> Option<&str> {
        self.tags.get(OPERATION_ID).map(String::as_str)
    }

    /// Telemetry kind, derived from the last segment of the envelope name.
    pub fn kind(&self) -> Option<TelemetryKind> {
        self.name
            .as_str()
            .rsplit('.')
            .next()
            .and_then(TelemetryKind::from_name_segment)
    }

    /// Response code of a request or result code of a dependency.
    pub fn response_code(&self) -> Option<&str> {
        match &self.data {
            Data::Request(data) => Some(data.response_code.as_str()),
            Data::RemoteDependency(data) => data.result_code.as_ref().map(|c| c.as_str()),
            _ => None,
        }
    }

    /// Success flag of requests, dependencies and availability results.
    pub fn success(&self) -> Option<bool> {
        match &self.data {
            Data::Request(data) => Some(data.success),
            Data::RemoteDependency(data) => data.success,
            Data::Availability(data) => Some(data.success),
            _ => None,
        }
    }

    /// Severity of a trace message or exception.
    pub fn severity_level(&self) -> Option<SeverityLevel> {
        match &self.data {
            Data::Message(data) => data.severity_level,
            Data::Exception(data) => data.severity_level,
            _ => None,
        }
    }

    /// A custom property of the item.
    pub fn property(&self, key: &str) -> Option<&str> {
        let properties = match &self.data {
            Data::Availability(data) => data.properties.as_ref(),
            Data::Event(data) => data.properties.as_ref(),
            Data::Exception(data) => data.properties.as_ref(),
            Data::Message(data) => data.properties.as_ref(),
            Data::Metric(data) => data.properties.as_ref(),
            Data::PageView(data) => data.properties.as_ref(),
            Data::RemoteDependency(data) => data.properties.as_ref(),
            Data::Request(data) => data.properties.as_ref(),
        };
        properties
            .and_then(|properties| properties.get(key))
            .map(|value| value.as_str())
    }

    /// Key the deterministic sampling decision is derived from: the operation id, or the name and
    /// instrumentation key for uncorrelated items.
    pub(crate) fn sampling_key(&self) -> String {
        match self.operation_id() {
            Some(operation_id) if !operation_id.is_empty() => operation_id.to_string(),
            _ => format!("{}{}", self.name, self.i_key),
        }
    }
}
