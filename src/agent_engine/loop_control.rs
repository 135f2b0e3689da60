use crate::agent_engine::state::{LoopConfig, TerminationReason};

/// Session-level guards: elapsed time, consecutive failures, and repeats of
/// an action that already failed for the same step.
pub struct LoopController {
    config: LoopConfig,
    start_time: std::time::Instant,
    failure_count: u32,
    repeat_count: u32,
}

impl LoopController {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            start_time: std::time::Instant::now(),
            failure_count: 0,
            repeat_count: 0,
        }
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
    }

    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.repeat_count = 0;
    }

    /// A proposal repeated an action that already failed for its step.
    pub fn record_repeat(&mut self) {
        self.repeat_count += 1;
    }

    pub fn clear_repeats(&mut self) {
        self.repeat_count = 0;
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn is_stuck(&self) -> bool {
        self.config.max_repeated_failures > 0
            && self.repeat_count >= self.config.max_repeated_failures
    }

    pub fn should_stop(&self) -> Option<TerminationReason> {
        if let Some(max_min) = self.config.max_duration_minutes {
            if self.start_time.elapsed().as_secs() / 60 >= max_min as u64 {
                return Some(TerminationReason::LoopLimit);
            }
        }
        if let Some(max_fail) = self.config.max_failures {
            if self.failure_count >= max_fail {
                return Some(TerminationReason::LoopLimit);
            }
        }
        if self.is_stuck() {
            return Some(TerminationReason::Stuck);
        }
        None
    }
}
