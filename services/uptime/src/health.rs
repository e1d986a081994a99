//! Debounced health state machine, one instance per monitor
//!
//! `Unknown` is left, and `Online`/`Offline` are swapped, only after
//! `threshold` consecutive probe results of the same outcome. A differing
//! result resets the opposite counter without changing state.

use chrono::{DateTime, Utc};

use crate::model::{HealthStatus, MonitorState, ProbeResult};

/// A state change accepted by the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthStatus,
    pub to: HealthStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HealthStateMachine {
    threshold: u32,
    state: MonitorState,
}

impl HealthStateMachine {
    pub fn new(monitor_id: &str, threshold: u32) -> Self {
        Self::resume(MonitorState::unknown(monitor_id), threshold)
    }

    /// Continue from a previously persisted state
    pub fn resume(state: MonitorState, threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            state,
        }
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn status(&self) -> HealthStatus {
        self.state.status
    }

    /// Feed one probe result, returning the transition it caused, if any
    pub fn observe(&mut self, result: &ProbeResult) -> Option<Transition> {
        let state = &mut self.state;
        state.last_probe_at = Some(result.at);
        state.last_response_time_ms = result.response_time_ms;

        let target = if result.success {
            state.consecutive_successes = state.consecutive_successes.saturating_add(1);
            state.consecutive_failures = 0;
            (state.consecutive_successes >= self.threshold).then_some(HealthStatus::Online)
        } else {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.consecutive_successes = 0;
            (state.consecutive_failures >= self.threshold).then_some(HealthStatus::Offline)
        };

        match target {
            Some(to) if to != state.status => {
                let from = state.status;
                state.status = to;
                state.last_transition_at = Some(result.at);
                Some(Transition {
                    from,
                    to,
                    at: result.at,
                })
            }
            _ => None,
        }
    }
}
