use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SamplerStatus {
    #[default]
    Idle,
    /// Waiting out the camera/model settling delay before the first sample.
    WarmingUp,
    Sampling,
    Stopped,
}

/// Sampler lifecycle plus the in-flight inference guard.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplerState {
    pub status: SamplerStatus,
    /// Bumped on every start so a tick from an earlier run cannot release the
    /// guard of a later one.
    pub run: u64,
    pub in_flight: bool,
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub readings: u64,
}

impl SamplerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_start(&self) -> bool {
        matches!(self.status, SamplerStatus::Idle | SamplerStatus::Stopped)
    }

    pub fn begin_warmup(&mut self) -> u64 {
        *self = Self {
            status: SamplerStatus::WarmingUp,
            run: self.run + 1,
            ..Self::default()
        };
        self.run
    }

    /// Only a warming-up sampler moves on; a stop that raced the warm-up wins.
    pub fn begin_sampling(&mut self) -> bool {
        if self.status != SamplerStatus::WarmingUp {
            return false;
        }
        self.status = SamplerStatus::Sampling;
        true
    }

    /// Claim the inference slot for a tick. `false` means the tick is skipped,
    /// either because an inference is still running or sampling has ended.
    pub fn try_begin_inference(&mut self) -> bool {
        if self.status != SamplerStatus::Sampling {
            return false;
        }
        self.ticks += 1;
        if self.in_flight {
            self.skipped_ticks += 1;
            return false;
        }
        self.in_flight = true;
        true
    }

    pub fn finish_inference(&mut self, run: u64, produced_reading: bool) {
        if run != self.run {
            return;
        }
        self.in_flight = false;
        if produced_reading {
            self.readings += 1;
        }
    }

    pub fn stop(&mut self) {
        self.status = SamplerStatus::Stopped;
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.status,
            SamplerStatus::WarmingUp | SamplerStatus::Sampling
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_idle_warmup_sampling_stopped() {
        let mut state = SamplerState::new();
        assert!(state.can_start());
        state.begin_warmup();
        assert_eq!(state.status, SamplerStatus::WarmingUp);
        assert!(!state.try_begin_inference());
        assert!(state.begin_sampling());
        assert!(state.is_running());
        state.stop();
        assert_eq!(state.status, SamplerStatus::Stopped);
        assert!(state.can_start());
    }

    #[test]
    fn second_tick_is_skipped_while_in_flight() {
        let mut state = SamplerState::new();
        let run = state.begin_warmup();
        state.begin_sampling();

        assert!(state.try_begin_inference());
        assert!(!state.try_begin_inference());
        assert_eq!(state.skipped_ticks, 1);

        state.finish_inference(run, true);
        assert!(state.try_begin_inference());
        assert_eq!(state.ticks, 3);
        assert_eq!(state.readings, 1);
    }

    #[test]
    fn stop_during_warmup_prevents_sampling() {
        let mut state = SamplerState::new();
        state.begin_warmup();
        state.stop();
        assert!(!state.begin_sampling());
        assert!(!state.try_begin_inference());
    }

    #[test]
    fn restart_resets_counters() {
        let mut state = SamplerState::new();
        state.begin_warmup();
        state.begin_sampling();
        state.try_begin_inference();
        state.stop();
        state.begin_warmup();
        assert_eq!(state.ticks, 0);
        assert!(!state.in_flight);
    }

    #[test]
    fn late_tick_from_previous_run_keeps_guard() {
        let mut state = SamplerState::new();
        let old_run = state.begin_warmup();
        state.begin_sampling();
        assert!(state.try_begin_inference());
        state.stop();

        state.begin_warmup();
        state.begin_sampling();
        assert!(state.try_begin_inference());
        state.finish_inference(old_run, true);
        assert!(state.in_flight);
        assert_eq!(state.readings, 0);
    }
}
