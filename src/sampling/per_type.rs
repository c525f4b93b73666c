use crate::{
    models::Envelope,
    sampling::{clamp_rate, SamplingProcessor},
    TelemetryKind,
};
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

/// Samples each telemetry kind at its own rate.
///
/// The kind is taken from the last segment of the envelope name. Kinds without a configured rate,
/// and envelopes with an unknown kind, use the default rate. Rates can be changed while the
/// sampler is in use.
#[derive(Debug)]
pub struct PerTypeSampler {
    rates: RwLock<HashMap<TelemetryKind, f64>>,
    default_rate: f64,
}

impl PerTypeSampler {
    /// Create a sampler with the given default rate.
    pub fn new(default_rate: f64) -> Self {
        Self {
            rates: RwLock::new(HashMap::new()),
            default_rate: clamp_rate(default_rate),
        }
    }

    /// Configure the rate of one kind.
    pub fn with_rate(self, kind: TelemetryKind, rate: f64) -> Self {
        self.set_rate(kind, rate);
        self
    }

    /// Change the rate of one kind.
    pub fn set_rate(&self, kind: TelemetryKind, rate: f64) {
        self.rates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, clamp_rate(rate));
    }

    /// The rate used for `kind`.
    pub fn rate_for(&self, kind: TelemetryKind) -> f64 {
        self.rates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .copied()
            .unwrap_or(self.default_rate)
    }
}

impl SamplingProcessor for PerTypeSampler {
    fn sampling_rate(&self, envelope: &Envelope) -> f64 {
        match envelope.kind() {
            Some(kind) => self.rate_for(kind),
            None => self.default_rate,
        }
    }
}
