use std::{io::Write, time::Duration};

use rama::telemetry::tracing;

use super::{Reporter, RequestOutcome, RequestResultEvent, RunState};

pub struct HumanReporter {
    out: Box<dyn Write + Send>,
    last_tick: Duration,
    last_sent: u64,
}

impl HumanReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            last_tick: Duration::ZERO,
            last_sent: 0,
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn emit(&mut self, line: std::fmt::Arguments<'_>) {
        if let Err(err) = writeln!(self.out, "{line}").and_then(|_| self.out.flush()) {
            tracing::debug!("failed to write report line: {err}");
        }
    }
}

pub(super) fn format_latency(latency: Option<Duration>) -> String {
    match latency {
        Some(d) => format!("{:.1}ms", d.as_secs_f64() * 1_000.),
        None => "-".to_owned(),
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let truncated = Duration::from_millis(elapsed.as_millis() as u64);
    humantime::format_duration(truncated).to_string()
}

impl Reporter for HumanReporter {
    fn on_result(&mut self, ev: &RequestResultEvent, _state: &RunState) {
        if let RequestOutcome::Failed(kind) = ev.outcome {
            tracing::debug!(
                worker = ev.worker,
                seq = ev.first_seq,
                failure = kind.as_str(),
                status = ev.outcome.status(),
                "request failed",
            );
        }
    }

    fn on_phase(&mut self, state: &RunState) {
        self.emit(format_args!(
            "t={:.1}s phase={}",
            state.elapsed.as_secs_f64(),
            state.phase
        ));
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

        self.emit(format_args!(
            "t={:.1}s phase={} rps={:.1} sent={} accepted={} rejected={} errors={} latency_mean={}",
            state.elapsed.as_secs_f64(),
            state.phase,
            rps,
            state.sent,
            state.accepted,
            state.rejected,
            state.errors,
            format_latency(state.latency_mean()),
        ));
    }

    fn finish(&mut self, state: &RunState) {
        self.emit(format_args!(
            "done reason={} elapsed={} rate={:.1} req/s",
            state.stop_reason.map(|r| r.as_str()).unwrap_or("none"),
            format_elapsed(state.elapsed),
            state.rate(),
        ));
        self.emit(format_args!(
            "  requests: sent={} accepted={} rejected={} errors={} retries={}",
            state.sent, state.accepted, state.rejected, state.errors, state.retries,
        ));
        self.emit(format_args!(
            "  events:   sent={} accepted={}",
            state.events_sent, state.events_accepted,
        ));
        self.emit(format_args!(
            "  latency:  min={} mean={} max={}",
            format_latency(state.latency_min),
            format_latency(state.latency_mean()),
            format_latency((state.sent > 0).then_some(state.latency_max)),
        ));
    }
}
