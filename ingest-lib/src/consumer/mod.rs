//! Fixed-size pool of background consumers draining the [`EventQueue`].
//!
//! Every worker loops: dequeue one event (suspending while empty), process it
//! within a bounded time, repeat. A failing, timed-out or panicking item is
//! counted and dropped; the worker moves on to the next one.
//!
//! Shutdown closes the queue and lets the workers finish everything that is
//! still queued before they stop: `Running -> Draining -> Stopped`.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use rama::{error::BoxError, telemetry::tracing};
use tokio::task::JoinSet;

use crate::{event::Event, queue::EventQueue};

mod processor;

pub use self::processor::SimulatedProcessor;

/// Downstream work performed for every dequeued event.
pub trait EventProcessor: Send + Sync + 'static {
    fn process(&self, event: &Event) -> impl Future<Output = Result<(), BoxError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Running,
    Draining,
    Stopped,
}

impl PoolState {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolState::Running => "running",
            PoolState::Draining => "draining",
            PoolState::Stopped => "stopped",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => PoolState::Running,
            1 => PoolState::Draining,
            _ => PoolState::Stopped,
        }
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters and lifecycle state shared between the pool and observers.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    processed: AtomicU64,
    failed: AtomicU64,
    state: AtomicU8,
}

impl ConsumerStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PoolState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerPoolConfig {
    pub workers: usize,
    pub max_processing_time: Duration,
}

impl Default for ConsumerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_processing_time: Duration::from_secs(1),
        }
    }
}

pub struct ConsumerPool {
    queue: EventQueue,
    stats: Arc<ConsumerStats>,
    workers: JoinSet<()>,
}

impl fmt::Debug for ConsumerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerPool")
            .field("queue", &self.queue)
            .field("stats", &self.stats)
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl ConsumerPool {
    /// Spawns `cfg.workers` (at least one) consumers on the current runtime.
    pub fn start<P: EventProcessor>(queue: EventQueue, processor: P, cfg: ConsumerPoolConfig) -> Self {
        let stats = Arc::new(ConsumerStats::default());
        let processor = Arc::new(processor);
        let worker_count = cfg.workers.max(1);

        let mut workers = JoinSet::new();
        for id in 0..worker_count {
            workers.spawn(consume(
                id,
                queue.clone(),
                processor.clone(),
                stats.clone(),
                cfg.max_processing_time,
            ));
        }

        tracing::info!(
            consumer.count = worker_count,
            queue.capacity = queue.capacity(),
            "consumer pool running",
        );

        Self {
            queue,
            stats,
            workers,
        }
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    pub fn state(&self) -> PoolState {
        self.stats.state()
    }

    /// Closes the queue and waits until every queued event is processed.
    pub async fn drain(mut self) {
        self.stats.set_state(PoolState::Draining);
        tracing::info!(
            queue.len = self.queue.len(),
            "consumer pool draining remaining queue"
        );

        self.queue.close();

        while let Some(result) = self.workers.join_next().await {
            if let Err(err) = result {
                tracing::error!("consumer task exited abnormally: {err}");
            }
        }

        self.stats.set_state(PoolState::Stopped);
        tracing::info!(
            consumer.processed = self.stats.processed(),
            consumer.failed = self.stats.failed(),
            "consumer pool stopped",
        );
    }
}

async fn consume<P: EventProcessor>(
    id: usize,
    queue: EventQueue,
    processor: Arc<P>,
    stats: Arc<ConsumerStats>,
    max_processing_time: Duration,
) {
    tracing::debug!(consumer.id = id, "consumer started");

    while let Some(event) = queue.dequeue_one().await {
        // a separate task keeps a panicking processor from taking the worker down
        let mut task = tokio::spawn({
            let processor = processor.clone();
            async move { processor.process(&event).await }
        });

        match tokio::time::timeout(max_processing_time, &mut task).await {
            Ok(Ok(Ok(()))) => {
                stats.processed.fetch_add(1, Ordering::AcqRel);
            }
            Ok(Ok(Err(err))) => {
                stats.failed.fetch_add(1, Ordering::AcqRel);
                tracing::debug!(consumer.id = id, "event processing failed (dropped): {err}");
            }
            Ok(Err(err)) => {
                stats.failed.fetch_add(1, Ordering::AcqRel);
                tracing::warn!(consumer.id = id, "event processing aborted (dropped): {err}");
            }
            Err(_) => {
                task.abort();
                stats.failed.fetch_add(1, Ordering::AcqRel);
                tracing::warn!(
                    consumer.id = id,
                    timeout = ?max_processing_time,
                    "event processing timed out (dropped)",
                );
            }
        }
    }

    tracing::debug!(consumer.id = id, "consumer stopped: queue closed and drained");
}
