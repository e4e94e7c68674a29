use std::time::Duration;

use rand::{Rng as _, SeedableRng as _};
use tokio::time::Instant;

/// Per-worker send cadence.
///
/// Sends follow a nominal schedule `start + phase + k * interval`, where the
/// phase is drawn once from `[0, interval)` so workers do not fire in lockstep.
/// Keeping the schedule (instead of sleeping a full interval after every send)
/// absorbs send latency: a late send shrinks the next sleep, so the long term
/// rate converges to `1 / interval`.
///
/// Lag is capped at one interval: a worker that falls further behind
/// restarts its schedule from "now" rather than bursting to catch up.
///
/// Jitter in `[0, jitter]` is added on top of every scheduled tick
/// and never shifts the schedule itself.
pub(crate) struct Cadence {
    interval: Duration,
    jitter: Duration,
    /// `None` once the schedule runs past what an `Instant` can represent
    next_tick: Option<Instant>,
    rng: rand::rngs::SmallRng,
}

impl Cadence {
    pub(crate) fn new(interval: Duration, jitter: Duration, start: Instant) -> Self {
        Self::new_with_rng(interval, jitter, start, rand::rngs::SmallRng::from_os_rng())
    }

    fn new_with_rng(
        interval: Duration,
        jitter: Duration,
        start: Instant,
        mut rng: rand::rngs::SmallRng,
    ) -> Self {
        let phase = random_below(&mut rng, interval);
        Self {
            interval,
            jitter,
            next_tick: start.checked_add(phase),
            rng,
        }
    }

    /// Returns when the next send should happen and advances the schedule.
    ///
    /// `None` once that moment would lie at or beyond the `deadline`.
    pub(crate) fn next_send_at(&mut self, now: Instant, deadline: Option<Instant>) -> Option<Instant> {
        let mut next_tick = self.next_tick?;
        if now.saturating_duration_since(next_tick) > self.interval {
            next_tick = now;
        }

        let send_at = next_tick.checked_add(self.sample_jitter())?;
        if deadline.is_some_and(|deadline| send_at >= deadline) {
            return None;
        }

        self.next_tick = next_tick.checked_add(self.interval);
        Some(send_at)
    }

    fn sample_jitter(&mut self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let micros = self.jitter.as_micros().min(u64::MAX as u128) as u64;
        Duration::from_micros(self.rng.random_range(0..=micros))
    }
}

fn random_below(rng: &mut rand::rngs::SmallRng, bound: Duration) -> Duration {
    let nanos = bound.as_nanos().min(u64::MAX as u128) as u64;
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rng.random_range(0..nanos))
}
