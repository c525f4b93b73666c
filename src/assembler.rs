use crate::{
    config::TelemetryConfig,
    convert::{duration_to_string, time_to_string, to_measurements, to_properties},
    correlation::{id, CorrelationContext},
    models::{
        context_tag_keys as tags, AvailabilityData, Data, DataPoint, DataPointType, Envelope,
        EventData, ExceptionData, ExceptionDetails, MessageData, MetricData, PageViewData,
        RemoteDependencyData, RequestData, Sanitize, StackFrameData, Tags,
    },
    tags::common_tags,
    telemetry::*,
};

/// Turns telemetry items into envelopes: wire payload, process tags, correlation tags and item
/// overrides, in that order of precedence.
#[derive(Debug, Clone)]
pub(crate) struct EnvelopeAssembler {
    instrumentation_key: String,
    name_prefix: String,
    common_tags: Tags,
}

impl EnvelopeAssembler {
    pub(crate) fn new(instrumentation_key: &str, config: &TelemetryConfig) -> Self {
        Self {
            instrumentation_key: instrumentation_key.to_string(),
            name_prefix: format!(
                "Microsoft.ApplicationInsights.{}.",
                instrumentation_key.replace('-', "")
            ),
            common_tags: common_tags(config),
        }
    }

    pub(crate) fn assemble(
        &self,
        mut item: Telemetry,
        context: Option<&CorrelationContext>,
    ) -> Envelope {
        let kind = item.kind();
        let common = std::mem::take(item.common_mut());
        let item_id = common
            .id
            .clone()
            .or_else(|| context.map(|context| context.span_id().to_string()))
            .unwrap_or_else(id::new_item_id);

        let mut tags = self.common_tags.clone();
        match context {
            Some(context) => {
                tags.insert(tags::OPERATION_ID.into(), context.trace_id().to_string());
                if let Some(parent_span_id) = context.parent_span_id() {
                    tags.insert(tags::OPERATION_PARENT_ID.into(), parent_span_id.to_string());
                }
                if !context.operation_name().is_empty() {
                    tags.insert(
                        tags::OPERATION_NAME.into(),
                        context.operation_name().to_string(),
                    );
                }
            }
            None => {
                tags.insert(tags::OPERATION_ID.into(), id::new_operation_id());
            }
        }
        // Requests name their operation when nothing else did.
        if let Telemetry::Request(request) = &item {
            tags.entry(tags::OPERATION_NAME.into())
                .or_insert_with(|| request.name.clone());
        }
        tags.extend(common.tags);
        tags.sanitize();

        let time = time_to_string(common.timestamp);
        let data = to_data(item, item_id, common.properties, common.measurements);

        Envelope {
            name: format!("{}{}", self.name_prefix, kind.name_segment()).into(),
            time,
            sample_rate: 1.0,
            i_key: self.instrumentation_key.clone(),
            tags,
            data,
        }
    }
}

fn to_data(
    item: Telemetry,
    item_id: String,
    properties: std::collections::BTreeMap<String, String>,
    measurements: std::collections::BTreeMap<String, f64>,
) -> Data {
    let properties = to_properties(properties);
    let measurements = to_measurements(measurements);
    match item {
        Telemetry::Event(event) => Data::Event(EventData {
            ver: 2,
            name: event.name.into(),
            properties,
            measurements,
        }),
        Telemetry::Metric(metric) => Data::Metric(MetricData {
            ver: 2,
            metrics: vec![metric.into()],
            properties,
        }),
        Telemetry::Trace(trace) => Data::Message(MessageData {
            ver: 2,
            message: trace.message.into(),
            severity_level: Some(trace.severity),
            properties,
            measurements,
        }),
        Telemetry::Request(request) => Data::Request(RequestData {
            ver: 2,
            id: item_id.into(),
            source: request.source.map(Into::into),
            name: Some(request.name.into()),
            duration: duration_to_string(request.duration),
            response_code: request.response_code.into(),
            success: request.success,
            url: Some(request.url.into()),
            properties,
            measurements,
        }),
        Telemetry::RemoteDependency(dependency) => Data::RemoteDependency(RemoteDependencyData {
            ver: 2,
            name: dependency.name.into(),
            id: Some(item_id.into()),
            result_code: Some(dependency.result_code.into()),
            duration: duration_to_string(dependency.duration),
            success: Some(dependency.success),
            data: dependency.data.map(Into::into),
            target: Some(dependency.target.into()),
            type_: Some(dependency.dependency_type.into()),
            properties,
            measurements,
        }),
        Telemetry::Exception(exception) => Data::Exception(ExceptionData {
            ver: 2,
            exceptions: exception
                .exceptions
                .into_iter()
                .enumerate()
                .map(|(index, info)| exception_details(index as i32, info))
                .collect(),
            severity_level: exception.severity,
            properties,
            measurements,
        }),
        Telemetry::Availability(availability) => Data::Availability(AvailabilityData {
            ver: 2,
            id: item_id.into(),
            name: availability.name.into(),
            duration: duration_to_string(availability.duration),
            success: availability.success,
            run_location: availability.run_location.map(Into::into),
            message: availability.message.map(Into::into),
            properties,
            measurements,
        }),
        Telemetry::PageView(page_view) => Data::PageView(PageViewData {
            ver: 2,
            name: page_view.name.into(),
            url: page_view.url.map(Into::into),
            duration: page_view.duration.map(duration_to_string),
            id: Some(item_id.into()),
            properties,
            measurements,
        }),
    }
}

impl From<MetricTelemetry> for DataPoint {
    fn from(metric: MetricTelemetry) -> Self {
        let (kind, count, min, max, std_dev) = match metric.aggregation {
            Some(aggregation) => (
                DataPointType::Aggregation,
                Some(aggregation.count),
                Some(aggregation.min),
                Some(aggregation.max),
                Some(aggregation.std_dev),
            ),
            None => (DataPointType::Measurement, None, None, None, None),
        };
        DataPoint {
            ns: metric.namespace.map(Into::into),
            name: metric.name.into(),
            kind,
            value: metric.value,
            count,
            min,
            max,
            std_dev,
        }
    }
}

// The chain is outermost first, so every error's outer error is the one before it.
fn exception_details(index: i32, info: ExceptionInfo) -> ExceptionDetails {
    let parsed_stack: Vec<StackFrameData> = info
        .frames
        .into_iter()
        .map(|frame| StackFrameData {
            level: frame.level as i32,
            method: frame.method.into(),
            assembly: frame.assembly.map(Into::into),
            file_name: frame.file_name.map(Into::into),
            line: frame.line.map(|line| line as i32),
        })
        .collect();
    ExceptionDetails {
        id: index,
        outer_id: if index > 0 { Some(index - 1) } else { None },
        type_name: info.type_name.into(),
        message: info.message.into(),
        has_full_stack: !parsed_stack.is_empty(),
        stack: info.stack.map(Into::into),
        parsed_stack: Some(parsed_stack).filter(|frames| !frames.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SeverityLevel;
    use std::time::{Duration, UNIX_EPOCH};

    const IKEY: &str = "0fdcec70-0ce5-4085-89d9-9ae8ead9af66";

    fn assembler() -> EnvelopeAssembler {
        EnvelopeAssembler::new(IKEY, &TelemetryConfig::default().with_cloud_role("api"))
    }

    #[test]
    fn name_contains_ikey_without_dashes() {
        let envelope = assembler().assemble(EventTelemetry::new("started").into(), None);
        assert_eq!(
            "Microsoft.ApplicationInsights.0fdcec700ce5408589d99ae8ead9af66.Event",
            envelope.name()
        );
        assert_eq!(IKEY, envelope.instrumentation_key());
        assert_eq!(1.0, envelope.sample_rate());
        assert_eq!(Some(crate::TelemetryKind::Event), envelope.kind());
    }

    #[test]
    fn uncorrelated_items_get_a_fresh_operation_id() {
        let a = assembler().assemble(EventTelemetry::new("a").into(), None);
        let b = assembler().assemble(EventTelemetry::new("b").into(), None);
        let a_id = a.operation_id().unwrap();
        assert_eq!(32, a_id.len());
        assert_ne!(a_id, b.operation_id().unwrap());
        assert!(!a.tags().contains_key(tags::OPERATION_PARENT_ID));
    }

    #[test]
    fn correlation_tags_and_item_id_come_from_context() {
        let parent = CorrelationContext::new_root();
        let context = parent.child().with_operation_name("GET /orders");
        let request = RequestTelemetry::new(
            "GET",
            "https://shop.example/orders?id=1",
            Duration::from_millis(1500),
            200,
        );
        let envelope = assembler().assemble(request.into(), Some(&context));

        assert_eq!(
            Some(parent.trace_id().to_string().as_str()),
            envelope.operation_id()
        );
        assert_eq!(
            Some(&parent.span_id().to_string()),
            envelope.tags().get(tags::OPERATION_PARENT_ID)
        );
        assert_eq!(
            Some(&"GET /orders".to_string()),
            envelope.tags().get(tags::OPERATION_NAME)
        );
        assert_eq!(Some(&"api".to_string()), envelope.tags().get(tags::CLOUD_ROLE));
        match &envelope.data {
            Data::Request(data) => {
                assert_eq!(context.span_id().to_string(), data.id.as_str());
                assert_eq!("0.00:00:01.500000", data.duration);
                assert_eq!("200", data.response_code.as_str());
            }
            other => panic!("unexpected data {:?}", other),
        }
    }

    #[test]
    fn item_tags_override_context_tags() {
        let context = CorrelationContext::new_root();
        let event = EventTelemetry::new("e")
            .with_tag(tags::OPERATION_ID, "custom-operation")
            .with_tag(tags::CLOUD_ROLE, "worker");
        let envelope = assembler().assemble(event.into(), Some(&context));
        assert_eq!(Some("custom-operation"), envelope.operation_id());
        assert_eq!(Some(&"worker".to_string()), envelope.tags().get(tags::CLOUD_ROLE));
    }

    #[test]
    fn explicit_item_id_wins() {
        let context = CorrelationContext::new_root();
        let dependency = RemoteDependencyTelemetry::new(
            "GET /",
            "HTTP",
            "example.com",
            Duration::ZERO,
            "200",
            true,
        )
        .with_id("my-id");
        let envelope = assembler().assemble(dependency.into(), Some(&context));
        match &envelope.data {
            Data::RemoteDependency(data) => {
                assert_eq!(Some("my-id"), data.id.as_ref().map(|id| id.as_str()))
            }
            other => panic!("unexpected data {:?}", other),
        }
    }

    #[test]
    fn uncorrelated_request_gets_a_fresh_id_and_operation_name() {
        let request = RequestTelemetry::new("POST", "/cart", Duration::ZERO, 201);
        let envelope = assembler().assemble(request.into(), None);
        assert_eq!(
            Some(&"POST /cart".to_string()),
            envelope.tags().get(tags::OPERATION_NAME)
        );
        match &envelope.data {
            Data::Request(data) => assert_eq!(16, data.id.as_str().len()),
            other => panic!("unexpected data {:?}", other),
        }
    }

    #[test]
    fn exception_chain_links_outer_ids() {
        let mut exception = ExceptionTelemetry::new("ConfigError", "reading config failed")
            .with_frames(vec![StackFrame {
                level: 0,
                method: "app::config::load".into(),
                assembly: Some("app".into()),
                file_name: Some("src/config.rs".into()),
                line: Some(42),
            }]);
        exception.exceptions.push(ExceptionInfo {
            type_name: "io::Error".into(),
            message: "disk on fire".into(),
            stack: None,
            frames: Vec::new(),
        });
        let envelope = assembler().assemble(exception.into(), None);
        assert_eq!(Some(SeverityLevel::Error), envelope.severity_level());
        match &envelope.data {
            Data::Exception(data) => {
                assert_eq!(2, data.exceptions.len());
                assert_eq!(None, data.exceptions[0].outer_id);
                assert!(data.exceptions[0].has_full_stack);
                assert_eq!(Some(0), data.exceptions[1].outer_id);
                assert_eq!(None, data.exceptions[1].parsed_stack);
            }
            other => panic!("unexpected data {:?}", other),
        }
    }

    #[test]
    fn aggregated_metric() {
        let metric = MetricTelemetry {
            aggregation: Some(MetricAggregation {
                count: 3,
                min: 1.0,
                max: 5.0,
                std_dev: 1.6,
            }),
            ..MetricTelemetry::new("queue_length", 9.0)
        };
        let envelope = assembler().assemble(metric.into(), None);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!("MetricData", json["data"]["baseType"]);
        assert_eq!("Aggregation", json["data"]["baseData"]["metrics"][0]["kind"]);
        assert_eq!(3, json["data"]["baseData"]["metrics"][0]["count"]);
    }

    #[test]
    fn timestamp_and_properties_are_copied() {
        let event = EventTelemetry::new("e")
            .with_timestamp(UNIX_EPOCH + Duration::from_secs(1_592_736_000))
            .with_property("region", "eu")
            .with_measurement("took", 2.0);
        let envelope = assembler().assemble(event.into(), None);
        assert_eq!("2020-06-21T10:40:00.000000Z", envelope.time());
        assert_eq!(Some("eu"), envelope.property("region"));
    }

    #[test]
    fn tag_values_are_truncated() {
        let event = EventTelemetry::new("e").with_tag(tags::SESSION_ID, "s".repeat(100));
        let envelope = assembler().assemble(event.into(), None);
        assert_eq!(64, envelope.tags()[tags::SESSION_ID].len());
    }
}
