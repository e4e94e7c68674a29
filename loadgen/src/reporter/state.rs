use std::{fmt, time::Duration};

use rama::telemetry::tracing;
use tokio::time::Instant;

use super::{RequestOutcome, RequestResultEvent};

/// Lifecycle of one generator run:
/// `Init -> Running -> {DurationElapsed | Cancelled} -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Running,
    DurationElapsed,
    Cancelled,
    Draining,
    Stopped,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Init => "init",
            RunPhase::Running => "running",
            RunPhase::DurationElapsed => "duration_elapsed",
            RunPhase::Cancelled => "cancelled",
            RunPhase::Draining => "draining",
            RunPhase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    DurationElapsed,
    Cancelled,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        RunPhase::from(self).as_str()
    }
}

impl From<StopReason> for RunPhase {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::DurationElapsed => RunPhase::DurationElapsed,
            StopReason::Cancelled => RunPhase::Cancelled,
        }
    }
}

/// Aggregate counters and timing of a run, owned by the result aggregator.
///
/// `sent` counts every request put on the wire, retries included.
#[derive(Debug, Clone)]
pub struct RunState {
    pub phase: RunPhase,
    pub stop_reason: Option<StopReason>,

    pub sent: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub errors: u64,
    pub retries: u64,

    pub events_sent: u64,
    pub events_accepted: u64,

    pub latency_min: Option<Duration>,
    pub latency_max: Duration,
    latency_total: Duration,

    started: Instant,
    pub elapsed: Duration,
}

impl RunState {
    pub fn new(started: Instant) -> Self {
        Self {
            phase: RunPhase::Init,
            stop_reason: None,
            sent: 0,
            accepted: 0,
            rejected: 0,
            errors: 0,
            retries: 0,
            events_sent: 0,
            events_accepted: 0,
            latency_min: None,
            latency_max: Duration::ZERO,
            latency_total: Duration::ZERO,
            started,
            elapsed: Duration::ZERO,
        }
    }

    pub fn apply(&mut self, ev: &RequestResultEvent) {
        if let RequestOutcome::Failed(super::FailureKind::Render) = ev.outcome {
            self.errors += 1;
            return;
        }

        self.sent += 1;
        self.events_sent += ev.events as u64;
        if ev.attempt > 0 {
            self.retries += 1;
        }

        match ev.outcome {
            RequestOutcome::Accepted { events } => {
                self.accepted += 1;
                self.events_accepted += events as u64;
            }
            RequestOutcome::Rejected { .. } => self.rejected += 1,
            RequestOutcome::Failed(_) => self.errors += 1,
        }

        self.latency_min = Some(
            self.latency_min
                .map_or(ev.latency, |min| min.min(ev.latency)),
        );
        self.latency_max = self.latency_max.max(ev.latency);
        self.latency_total += ev.latency;
    }

    pub fn set_phase(&mut self, phase: RunPhase) {
        if let RunPhase::DurationElapsed | RunPhase::Cancelled = phase {
            self.stop_reason.get_or_insert(match phase {
                RunPhase::Cancelled => StopReason::Cancelled,
                _ => StopReason::DurationElapsed,
            });
        }

        tracing::info!(from = %self.phase, to = %phase, "generator run state transition");
        self.phase = phase;
    }

    pub fn touch(&mut self, now: Instant) {
        self.elapsed = now.saturating_duration_since(self.started);
    }

    pub fn latency_mean(&self) -> Option<Duration> {
        let measured = u32::try_from(self.sent).ok().filter(|n| *n > 0)?;
        Some(self.latency_total / measured)
    }

    /// Requests per second over the whole run so far.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0. {
            0.
        } else {
            self.sent as f64 / secs
        }
    }
}
