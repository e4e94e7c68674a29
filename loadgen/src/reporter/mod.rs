//! Result aggregation and reporting.
//!
//! Dispatch workers never share counters: they stream one
//! [`RequestResultEvent`] per request over a channel to a single aggregator
//! task, which owns the [`RunState`] and feeds the configured [`Reporter`].

use std::time::Duration;

use rama::telemetry::tracing;
use tokio::{
    sync::mpsc::Receiver,
    time::{Instant, MissedTickBehavior},
};

mod human;
mod json;
mod state;

pub use self::{
    human::HumanReporter,
    json::JsonlReporter,
    state::{RunPhase, RunState, StopReason},
};

pub trait Reporter: Send + 'static {
    fn on_result(&mut self, ev: &RequestResultEvent, state: &RunState);
    fn on_phase(&mut self, _state: &RunState) {}
    fn on_tick(&mut self, state: &RunState);
    fn finish(&mut self, state: &RunState);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// a status that is neither success nor backpressure
    HttpStatus(u16),
    Transport,
    Timeout,
    /// success status with a body that is not an ingest response
    InvalidResponse,
    /// the batch could not be rendered, nothing was sent
    Render,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::HttpStatus(_) => "http_status",
            FailureKind::Transport => "transport",
            FailureKind::Timeout => "timeout",
            FailureKind::InvalidResponse => "invalid_response",
            FailureKind::Render => "render",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Accepted { events: usize },
    /// backpressure (429 / 503)
    Rejected { status: u16 },
    Failed(FailureKind),
}

impl RequestOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestOutcome::Accepted { .. } => "accepted",
            RequestOutcome::Rejected { .. } => "rejected",
            RequestOutcome::Failed(_) => "error",
        }
    }

    pub fn status(self) -> Option<u16> {
        match self {
            RequestOutcome::Rejected { status }
            | RequestOutcome::Failed(FailureKind::HttpStatus(status)) => Some(status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestResultEvent {
    pub worker: usize,
    /// sequence number of the first event in the batch
    pub first_seq: u64,
    /// 0 for the first send of a batch
    pub attempt: u32,
    pub events: usize,
    pub latency: Duration,
    pub outcome: RequestOutcome,
    /// the batch is sent again on the worker's next tick
    pub will_retry: bool,
}

#[derive(Debug)]
pub enum AggregatorMsg {
    Result(RequestResultEvent),
    Phase(RunPhase),
}

/// Folds all results into a [`RunState`] until every sender is gone.
///
/// Progress is reported every `tick`, the final summary once the
/// channel is closed.
pub async fn aggregate(
    mut reporter: Box<dyn Reporter>,
    mut rx: Receiver<AggregatorMsg>,
    tick: Duration,
) -> RunState {
    let mut state = RunState::new(Instant::now());

    let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_msg = rx.recv() => {
                let Some(msg) = maybe_msg else {
                    tracing::debug!("exit result aggregator: result senders closed");
                    break;
                };

                match msg {
                    AggregatorMsg::Result(ev) => {
                        state.apply(&ev);
                        reporter.on_result(&ev, &state);
                    }
                    AggregatorMsg::Phase(phase) => {
                        state.touch(Instant::now());
                        state.set_phase(phase);
                        reporter.on_phase(&state);
                    }
                }
            }

            _ = ticker.tick() => {
                state.touch(Instant::now());
                reporter.on_tick(&state);
            }
        }
    }

    state.touch(Instant::now());
    reporter.finish(&state);
    state
}
