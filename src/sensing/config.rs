use std::time::Duration;

use crate::capture::DetectorConfig;

use super::feed::DEFAULT_HISTORY_LEN;

/// Timing and detector knobs for the sampling loop.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Period between samples once warm-up is over.
    pub interval: Duration,

    /// Delay before the first sample so the stream has usable frames.
    pub warmup: Duration,

    /// Upper bound on a single inference call.
    pub inference_timeout: Duration,

    pub detector: DetectorConfig,

    /// Readings kept in the display feed.
    pub history_len: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            warmup: Duration::from_millis(1000),
            inference_timeout: Duration::from_secs(10),
            detector: DetectorConfig::default(),
            history_len: DEFAULT_HISTORY_LEN,
        }
    }
}

impl SamplerConfig {
    /// `tokio::time::interval` panics on a zero period.
    pub(crate) fn tick_period(&self) -> Duration {
        self.interval.max(Duration::from_millis(1))
    }
}
