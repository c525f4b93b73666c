use crate::{
    models::Envelope,
    sampling::{apply_rate, clamp_rate, SamplingProcessor},
    TelemetryKind,
};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError, RwLock},
    time::Duration,
};
use tokio::time::Instant;

const MAX_DECREASE_PER_STEP: f64 = 0.5;
const INCREASE_FACTOR: f64 = 1.2;
const INCREASE_BELOW: f64 = 0.5;

/// Configuration of an [`AdaptiveSampler`].
#[derive(Debug, Clone)]
pub struct AdaptiveSamplingConfig {
    /// Target volume of kept items per second, per controlled kind.
    pub max_items_per_second: f64,
    /// How often the rate is re-evaluated, and how far back volume is counted.
    pub evaluation_window: Duration,
    /// Rate before the first evaluation.
    pub initial_rate: f64,
    /// Lower bound of the rate.
    pub min_rate: f64,
    /// Upper bound of the rate.
    pub max_rate: f64,
    /// Kinds with their own counter and rate. All other kinds share one.
    pub kinds: Vec<TelemetryKind>,
}

impl Default for AdaptiveSamplingConfig {
    fn default() -> Self {
        Self {
            max_items_per_second: 5.0,
            evaluation_window: Duration::from_secs(15),
            initial_rate: 100.0,
            min_rate: 0.1,
            max_rate: 100.0,
            kinds: Vec::new(),
        }
    }
}

/// Adjusts the sampling rate to keep the volume of kept items near a target.
///
/// Every evaluation window the observed volume of kept items is compared with
/// `max_items_per_second`. Above the target, the rate shrinks by the excess ratio, but by at most
/// half per step. Below half the target, it grows by 20%. The rate stays within
/// `[min_rate, max_rate]`.
#[derive(Debug)]
pub struct AdaptiveSampler {
    config: AdaptiveSamplingConfig,
    origin: Instant,
    controllers: HashMap<TelemetryKind, RateController>,
    fallback: RateController,
}

#[derive(Debug)]
struct RateController {
    state: RwLock<RateState>,
    volume: VolumeCounter,
}

#[derive(Debug)]
struct RateState {
    rate: f64,
    last_evaluation: Instant,
}

/// Per-second counters over the evaluation window, one lock per bucket.
#[derive(Debug)]
struct VolumeCounter {
    buckets: Vec<Mutex<Bucket>>,
}

#[derive(Debug, Default)]
struct Bucket {
    second: u64,
    count: u64,
}

impl AdaptiveSampler {
    /// Create a sampler.
    pub fn new(mut config: AdaptiveSamplingConfig) -> Self {
        config.min_rate = clamp_rate(config.min_rate);
        config.max_rate = clamp_rate(config.max_rate).max(config.min_rate);
        config.initial_rate = config.initial_rate.clamp(config.min_rate, config.max_rate);
        if config.evaluation_window < Duration::from_secs(1) {
            config.evaluation_window = Duration::from_secs(1);
        }

        let origin = Instant::now();
        let window_secs = config.evaluation_window.as_secs() as usize;
        let controllers = config
            .kinds
            .iter()
            .map(|kind| {
                (
                    *kind,
                    RateController::new(config.initial_rate, origin, window_secs),
                )
            })
            .collect();
        let fallback = RateController::new(config.initial_rate, origin, window_secs);
        Self {
            config,
            origin,
            controllers,
            fallback,
        }
    }

    /// The current rate for `kind`.
    pub fn current_rate(&self, kind: TelemetryKind) -> f64 {
        self.controller(Some(kind)).rate()
    }

    fn controller(&self, kind: Option<TelemetryKind>) -> &RateController {
        kind.and_then(|kind| self.controllers.get(&kind))
            .unwrap_or(&self.fallback)
    }

    fn second(&self, now: Instant) -> u64 {
        now.duration_since(self.origin).as_secs()
    }
}

impl SamplingProcessor for AdaptiveSampler {
    fn sampling_rate(&self, envelope: &Envelope) -> f64 {
        self.controller(envelope.kind()).rate()
    }

    fn should_sample(&self, envelope: &mut Envelope) -> bool {
        let now = Instant::now();
        let second = self.second(now);
        let controller = self.controller(envelope.kind());
        controller.evaluate(now, second, &self.config);
        let keep = apply_rate(envelope, controller.rate());
        if keep {
            controller.volume.record(second);
        }
        keep
    }
}

impl RateController {
    fn new(rate: f64, origin: Instant, window_secs: usize) -> Self {
        Self {
            state: RwLock::new(RateState {
                rate,
                last_evaluation: origin,
            }),
            volume: VolumeCounter::new(window_secs),
        }
    }

    fn rate(&self) -> f64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rate
    }

    fn evaluate(&self, now: Instant, second: u64, config: &AdaptiveSamplingConfig) {
        let window = config.evaluation_window;
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if now.duration_since(state.last_evaluation) < window {
                return;
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if now.duration_since(state.last_evaluation) < window {
            return;
        }
        let observed = self.volume.per_second(second);
        let max = config.max_items_per_second;
        let current = state.rate;
        let next = if observed > max {
            (current * max / observed).max(current * MAX_DECREASE_PER_STEP)
        } else if observed < INCREASE_BELOW * max {
            current * INCREASE_FACTOR
        } else {
            current
        };
        state.rate = next.clamp(config.min_rate, config.max_rate);
        state.last_evaluation = now;
        tracing::debug!(
            observed_per_second = observed,
            previous_rate = current,
            rate = state.rate,
            "adaptive sampling rate evaluated"
        );
    }
}

impl VolumeCounter {
    fn new(window_secs: usize) -> Self {
        Self {
            buckets: (0..window_secs.max(1))
                .map(|_| Mutex::new(Bucket::default()))
                .collect(),
        }
    }

    fn record(&self, second: u64) {
        let index = (second % self.buckets.len() as u64) as usize;
        let mut bucket = self.buckets[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if bucket.second != second {
            bucket.second = second;
            bucket.count = 0;
        }
        bucket.count += 1;
    }

    /// Average items per second over the window ending at `second`.
    fn per_second(&self, second: u64) -> f64 {
        let len = self.buckets.len() as u64;
        let total: u64 = self
            .buckets
            .iter()
            .map(|bucket| {
                let bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
                if bucket.second <= second && second - bucket.second < len {
                    bucket.count
                } else {
                    0
                }
            })
            .sum();
        total as f64 / len as f64
    }
}
