use crate::models::{Measurements, Properties};
use chrono::{DateTime, SecondsFormat, Utc};
use std::{
    collections::BTreeMap,
    time::{Duration, SystemTime},
};

/// Renders a duration as `d.hh:mm:ss.ffffff`.
pub(crate) fn duration_to_string(duration: Duration) -> String {
    let micros = duration.as_micros();
    let s = micros / 1_000_000 % 60;
    let m = micros / 1_000_000 / 60 % 60;
    let h = micros / 1_000_000 / 60 / 60 % 24;
    let d = micros / 1_000_000 / 60 / 60 / 24;
    let micros_remaining = micros % 1_000_000;
    format!(
        "{}.{:0>2}:{:0>2}:{:0>2}.{:0>6}",
        d, h, m, s, micros_remaining
    )
}

/// Renders a point in time as RFC 3339 in UTC with microsecond precision.
pub(crate) fn time_to_string(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn to_properties(properties: BTreeMap<String, String>) -> Option<Properties> {
    Some(
        properties
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    )
    .filter(|x: &Properties| !x.is_empty())
}

pub(crate) fn to_measurements(measurements: BTreeMap<String, f64>) -> Option<Measurements> {
    Some(
        measurements
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect(),
    )
    .filter(|x: &Measurements| !x.is_empty())
}
