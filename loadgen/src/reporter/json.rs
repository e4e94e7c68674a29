use std::{io::Write, time::Duration};

use rama::telemetry::tracing;
use serde_json::{Value, json};

use super::{Reporter, RequestOutcome, RequestResultEvent, RunState};

/// Reports as JSON lines: `phase`, `progress` and `final` records,
/// plus one `event` record per request when enabled.
pub struct JsonlReporter {
    out: Box<dyn Write + Send>,
    emit_events: bool,
    last_tick: Duration,
    last_sent: u64,
}

impl JsonlReporter {
    pub fn new(out: Box<dyn Write + Send>, emit_events: bool) -> Self {
        Self {
            out,
            emit_events,
            last_tick: Duration::ZERO,
            last_sent: 0,
        }
    }

    pub fn stdout(emit_events: bool) -> Self {
        Self::new(Box::new(std::io::stdout()), emit_events)
    }

    fn emit(&mut self, line: &Value) {
        if let Err(err) = writeln!(self.out, "{line}").and_then(|_| self.out.flush()) {
            tracing::debug!("failed to write report line: {err}");
        }
    }
}

fn totals(state: &RunState) -> Value {
    json!({
        "sent": state.sent,
        "accepted": state.accepted,
        "rejected": state.rejected,
        "errors": state.errors,
        "retries": state.retries,
        "events_sent": state.events_sent,
        "events_accepted": state.events_accepted,
    })
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.
}

impl Reporter for JsonlReporter {
    fn on_result(&mut self, ev: &RequestResultEvent, state: &RunState) {
        if !self.emit_events {
            return;
        }

        let line = json!({
            "type": "event",
            "t_ms": state.elapsed.as_millis() as u64,
            "worker": ev.worker,
            "seq": ev.first_seq,
            "attempt": ev.attempt,
            "events": ev.events,
            "latency_ms": millis(ev.latency),
            "outcome": ev.outcome.as_str(),
            "status": ev.outcome.status(),
            "failure": match ev.outcome {
                RequestOutcome::Failed(kind) => Some(kind.as_str()),
                _ => None,
            },
            "will_retry": ev.will_retry,
        });
        self.emit(&line);
    }

    fn on_phase(&mut self, state: &RunState) {
        let line = json!({
            "type": "phase",
            "t_ms": state.elapsed.as_millis() as u64,
            "phase": state.phase.as_str(),
        });
        self.emit(&line);
    }

    fn on_tick(&mut self, state: &RunState) {
        let interval = state.elapsed.saturating_sub(self.last_tick).as_secs_f64();
        let rps = if interval == 0. {
            0.
        } else {
            (state.sent - self.last_sent) as f64 / interval
        };
        self.last_tick = state.elapsed;
        self.last_sent = state.sent;

        let line = json!({
            "type": "progress",
            "t_ms": state.elapsed.as_millis() as u64,
            "phase": state.phase.as_str(),
            "rps": rps,
            "total": totals(state),
            "latency_mean_ms": state.latency_mean().map(millis),
        });
        self.emit(&line);
    }

    fn finish(&mut self, state: &RunState) {
        let line = json!({
            "type": "final",
            "reason": state.stop_reason.map(|r| r.as_str()),
            "elapsed_ms": state.elapsed.as_millis() as u64,
            "rate": state.rate(),
            "total": totals(state),
            "latency_ms": {
                "min": state.latency_min.map(millis),
                "mean": state.latency_mean().map(millis),
                "max": (state.sent > 0).then(|| millis(state.latency_max)),
            },
        });
        self.emit(&line);
    }
}
