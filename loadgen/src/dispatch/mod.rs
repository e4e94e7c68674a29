//! Paced request dispatch.
//!
//! `concurrency` independent workers each send one batch per
//! [`Cadence`](crate::pacer::Cadence) tick, so the aggregate rate is
//! `concurrency / worker_interval = rps`. A worker never has more than one
//! request in flight. Results stream to the aggregator, the run ends when
//! the duration elapses or the guard is cancelled, whichever comes first.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rama::{
    Service,
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::{Request, Response},
    telemetry::tracing::{self, Instrument as _},
};
use serde_json::Value;
use tokio::{
    sync::mpsc::{self, Sender},
    task::JoinSet,
    time::Instant,
};

use crate::{
    config::GeneratorConfig,
    pacer::Cadence,
    payload::{PayloadRenderer, render_batch},
    reporter::{
        AggregatorMsg, FailureKind, Reporter, RequestOutcome, RequestResultEvent, RunPhase,
        RunState, StopReason, aggregate,
    },
};

mod client;
mod outcome;
mod preflight;

pub use self::{client::new_web_client, preflight::check_target_reachable};

use self::outcome::send_batch;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Runs the generator until the configured duration elapses or `guard`
/// is cancelled, and returns the final aggregated state.
pub async fn run_generator<S, R>(
    guard: ShutdownGuard,
    cfg: Arc<GeneratorConfig>,
    client: S,
    renderer: Arc<R>,
    reporter: Box<dyn Reporter>,
) -> Result<RunState, BoxError>
where
    S: Service<Request, Output = Response, Error: Into<BoxError>> + Clone,
    R: PayloadRenderer + ?Sized,
{
    let (result_tx, result_rx) = mpsc::channel(cfg.concurrency * 8);
    let aggregator = tokio::spawn(aggregate(reporter, result_rx, REPORT_INTERVAL));

    dispatch(guard, cfg, client, renderer, result_tx).await;

    Ok(aggregator.await.context("join result aggregator")?)
}

async fn dispatch<S, R>(
    guard: ShutdownGuard,
    cfg: Arc<GeneratorConfig>,
    client: S,
    renderer: Arc<R>,
    result_tx: Sender<AggregatorMsg>,
) where
    S: Service<Request, Output = Response, Error: Into<BoxError>> + Clone,
    R: PayloadRenderer + ?Sized,
{
    let start = Instant::now();
    // a deadline beyond what an Instant can hold is no deadline at all
    let deadline = cfg.duration.and_then(|duration| start.checked_add(duration));
    let interval = cfg.worker_interval;
    let seq = Arc::new(AtomicU64::new(0));

    tracing::info!(
        target = %cfg.target_url,
        rps = cfg.rps,
        concurrency = cfg.concurrency,
        batch_size = cfg.batch_size,
        worker_interval = ?interval,
        duration = ?cfg.duration,
        "generator running",
    );
    send_phase(&result_tx, RunPhase::Running).await;

    let mut workers = JoinSet::new();
    for id in 0..cfg.concurrency {
        let worker = Worker {
            id,
            cfg: cfg.clone(),
            client: client.clone(),
            renderer: renderer.clone(),
            cadence: Cadence::new(interval, cfg.jitter, start),
            seq: seq.clone(),
            deadline,
            result_tx: result_tx.clone(),
        };
        workers.spawn(
            worker
                .run(guard.clone())
                .instrument(tracing::debug_span!("worker", worker.id = id)),
        );
    }

    let reason = match deadline {
        Some(deadline) => tokio::select! {
            _ = guard.cancelled() => StopReason::Cancelled,
            _ = tokio::time::sleep_until(deadline) => StopReason::DurationElapsed,
        },
        None => {
            guard.cancelled().await;
            StopReason::Cancelled
        }
    };

    send_phase(&result_tx, reason.into()).await;
    send_phase(&result_tx, RunPhase::Draining).await;

    while let Some(result) = workers.join_next().await {
        if let Err(err) = result {
            tracing::error!("dispatch worker exited abnormally: {err}");
        }
    }

    send_phase(&result_tx, RunPhase::Stopped).await;
}

/// Resolves `drain_timeout` after the guard got cancelled,
/// never when there is no drain limit.
async fn drain_window_closed(guard: &ShutdownGuard, drain_timeout: Option<Duration>) {
    guard.cancelled().await;
    match drain_timeout {
        Some(window) => tokio::time::sleep(window).await,
        None => std::future::pending().await,
    }
}

async fn send_phase(tx: &Sender<AggregatorMsg>, phase: RunPhase) {
    if let Err(err) = tx.send(AggregatorMsg::Phase(phase)).await {
        tracing::debug!("failed to send phase msg: {err}");
    }
}

struct Worker<S, R: ?Sized> {
    id: usize,
    cfg: Arc<GeneratorConfig>,
    client: S,
    renderer: Arc<R>,
    cadence: Cadence,
    seq: Arc<AtomicU64>,
    deadline: Option<Instant>,
    result_tx: Sender<AggregatorMsg>,
}

/// A rejected batch waiting to be sent again.
struct PendingRetry {
    first_seq: u64,
    batch: Vec<Value>,
    attempt: u32,
}

impl<S, R> Worker<S, R>
where
    S: Service<Request, Output = Response, Error: Into<BoxError>>,
    R: PayloadRenderer + ?Sized,
{
    async fn run(mut self, guard: ShutdownGuard) {
        let mut pending: Option<PendingRetry> = None;

        loop {
            let Some(send_at) = self.cadence.next_send_at(Instant::now(), self.deadline) else {
                tracing::debug!("worker done: next send would pass the deadline");
                return;
            };

            tokio::select! {
                biased;

                _ = guard.cancelled() => {
                    tracing::debug!("worker done: guard shutdown");
                    return;
                }
                _ = tokio::time::sleep_until(send_at) => (),
            }

            let PendingRetry {
                first_seq,
                batch,
                attempt,
            } = match pending.take() {
                Some(retry) => retry,
                None => match self.render_fresh_batch() {
                    Ok(fresh) => fresh,
                    Err(ev) => {
                        self.report(ev).await;
                        continue;
                    }
                },
            };

            let req_start = Instant::now();
            let outcome = tokio::select! {
                outcome = send_batch(
                    &self.client,
                    &self.cfg.target_url,
                    &batch,
                    self.cfg.request_timeout,
                ) => outcome,
                _ = drain_window_closed(&guard, self.cfg.drain_timeout) => {
                    tracing::debug!(seq = first_seq, "in-flight request abandoned: drain window closed");
                    RequestOutcome::Failed(FailureKind::Timeout)
                }
            };
            let latency = req_start.elapsed();

            let will_retry = matches!(outcome, RequestOutcome::Rejected { .. })
                && self.cfg.on_backpressure.should_retry(attempt);

            let events = batch.len();
            if will_retry {
                pending = Some(PendingRetry {
                    first_seq,
                    batch,
                    attempt: attempt + 1,
                });
            }

            self.report(RequestResultEvent {
                worker: self.id,
                first_seq,
                attempt,
                events,
                latency,
                outcome,
                will_retry,
            })
            .await;
        }
    }

    fn render_fresh_batch(&self) -> Result<PendingRetry, RequestResultEvent> {
        let batch_size = self.cfg.batch_size;
        let first_seq = self.seq.fetch_add(batch_size as u64, Ordering::Relaxed);

        match render_batch(self.renderer.as_ref(), self.id, first_seq, batch_size) {
            Ok(batch) => Ok(PendingRetry {
                first_seq,
                batch,
                attempt: 0,
            }),
            Err(err) => {
                tracing::warn!(seq = first_seq, "failed to render batch: {err}");
                Err(RequestResultEvent {
                    worker: self.id,
                    first_seq,
                    attempt: 0,
                    events: 0,
                    latency: Duration::ZERO,
                    outcome: RequestOutcome::Failed(FailureKind::Render),
                    will_retry: false,
                })
            }
        }
    }

    async fn report(&self, ev: RequestResultEvent) {
        if let Err(err) = self.result_tx.send(AggregatorMsg::Result(ev)).await {
            tracing::debug!("failed to send client result msg: {err}");
        }
    }
}
