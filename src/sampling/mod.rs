//! Sampling processors.
//!
//! A processor decides per envelope whether it is kept and stamps the envelope's sample rate with
//! the inverse of the keep probability. Decisions are deterministic: they hash the envelope's
//! operation id, so every item of one operation is kept or dropped together at a given rate.

mod adaptive;
mod fixed;
mod per_type;
mod rules;

pub use adaptive::{AdaptiveSampler, AdaptiveSamplingConfig};
pub use fixed::FixedRateSampler;
pub use per_type::PerTypeSampler;
pub use rules::{IntelligentSampler, RuleEngine, SamplingRule, ERROR_PRIORITY};

use crate::models::Envelope;
use std::fmt::Debug;

/// Decides which envelopes are sent.
///
/// Rates are percentages in `[0, 100]`. Implementors usually only provide
/// [`SamplingProcessor::sampling_rate`]; the provided [`SamplingProcessor::should_sample`] applies
/// the deterministic hash test and stamps the sample rate.
pub trait SamplingProcessor: Send + Sync + Debug {
    /// Effective sampling percentage for `envelope`.
    fn sampling_rate(&self, envelope: &Envelope) -> f64;

    /// Decide whether to keep `envelope`, setting its sample rate to `100 / rate` (or `0` when the
    /// rate is zero).
    fn should_sample(&self, envelope: &mut Envelope) -> bool {
        let rate = self.sampling_rate(envelope);
        apply_rate(envelope, rate)
    }
}

/// Keeps every envelope with sample rate 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSampler;

impl SamplingProcessor for NoopSampler {
    fn sampling_rate(&self, _envelope: &Envelope) -> f64 {
        100.0
    }

    fn should_sample(&self, envelope: &mut Envelope) -> bool {
        envelope.sample_rate = 1.0;
        true
    }
}

/// Score of a sampling key in `[0, 2^32)`.
///
/// The key is normalized by removing dashes and lowercasing, then MD5-hashed. The first four bytes
/// of the digest, read big-endian, are the score.
pub fn sampling_score(key: &str) -> u32 {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    let digest = md5::compute(normalized.as_bytes());
    u32::from_be_bytes([digest.0[0], digest.0[1], digest.0[2], digest.0[3]])
}

/// Whether an item with the given sampling key is kept at `rate` percent.
pub fn is_sampled_in(key: &str, rate: f64) -> bool {
    let threshold = (clamp_rate(rate) / 100.0 * 4_294_967_296.0).floor();
    f64::from(sampling_score(key)) < threshold
}

pub(crate) fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 100.0)
    }
}

/// Stamps the sample rate for `rate` and runs the hash test.
pub(crate) fn apply_rate(envelope: &mut Envelope, rate: f64) -> bool {
    let rate = clamp_rate(rate);
    if rate <= 0.0 {
        envelope.sample_rate = 0.0;
        return false;
    }
    envelope.sample_rate = 100.0 / rate;
    is_sampled_in(&envelope.sampling_key(), rate)
}
