//! Busy/idle hysteresis per session.
//!
//! One poll with CPU accumulation at or above the threshold marks a session
//! busy. Going back to idle takes `idle_confirm_polls` consecutive quiet
//! polls, so a single stalled sample never ends a task.

use chrono::{DateTime, Utc};

use crate::config::ClassifierConfig;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActivityState {
    pub busy: bool,
    pub idle_poll_streak: u32,
    pub busy_since: Option<DateTime<Utc>>,
}

impl ActivityState {
    /// Remote sessions have no CPU signal and are busy for their whole life.
    pub fn remote(started_at: DateTime<Utc>) -> Self {
        Self {
            busy: true,
            idle_poll_streak: 0,
            busy_since: Some(started_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityTransition {
    /// Idle to busy.
    Started,
    /// Busy to idle after a busy period long enough to report.
    Finished { busy_duration_ms: u64 },
    /// Busy to idle after a busy period too short to report.
    Settled { busy_duration_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct ActivityClassifier {
    config: ClassifierConfig,
}

impl ActivityClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Feeds one CPU delta sample into `state`.
    pub fn observe(
        &self,
        state: &mut ActivityState,
        cpu_delta_seconds: f64,
        now: DateTime<Utc>,
    ) -> Option<ActivityTransition> {
        // Non-finite deltas carry no information; count them as quiet.
        let quiet =
            !cpu_delta_seconds.is_finite() || cpu_delta_seconds < self.config.cpu_delta_idle_threshold;
        if quiet {
            state.idle_poll_streak = state.idle_poll_streak.saturating_add(1);
        } else {
            state.idle_poll_streak = 0;
        }

        if state.busy && state.idle_poll_streak >= self.config.idle_confirm_polls {
            let busy_duration_ms = state
                .busy_since
                .map(|since| now.signed_duration_since(since).num_milliseconds().max(0) as u64)
                .unwrap_or(0);
            state.busy = false;
            state.busy_since = None;

            return Some(if busy_duration_ms >= self.config.min_busy_duration_ms {
                ActivityTransition::Finished { busy_duration_ms }
            } else {
                ActivityTransition::Settled { busy_duration_ms }
            });
        }

        if !state.busy && state.idle_poll_streak == 0 {
            state.busy = true;
            state.busy_since = Some(now);
            return Some(ActivityTransition::Started);
        }

        None
    }
}
