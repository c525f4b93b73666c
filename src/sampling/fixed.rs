use crate::{
    models::Envelope,
    sampling::{clamp_rate, SamplingProcessor},
};

/// Samples every envelope at the same rate.
#[derive(Debug, Clone, Copy)]
pub struct FixedRateSampler {
    rate: f64,
}

impl FixedRateSampler {
    /// Create a sampler keeping `rate` percent of operations. The rate is clamped to `[0, 100]`.
    pub fn new(rate: f64) -> Self {
        Self {
            rate: clamp_rate(rate),
        }
    }

    /// The configured rate.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl SamplingProcessor for FixedRateSampler {
    fn sampling_rate(&self, _envelope: &Envelope) -> f64 {
        self.rate
    }
}
