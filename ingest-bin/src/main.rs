#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

use std::{path::PathBuf, time::Duration};

use rama::{
    error::{BoxError, ErrorContext},
    graceful::{self, ShutdownGuard},
    net::socket::Interface,
    rt::Executor,
    tcp::server::TcpListener,
    telemetry::tracing::{self, Instrument as _},
};

use clap::Parser;

use eventpipe_ingest_lib::{
    consumer::{ConsumerPool, ConsumerPoolConfig, SimulatedProcessor},
    http::IngestState,
    queue::{DEFAULT_CAPACITY, EventQueue},
    utils,
};

pub mod server;

#[cfg(target_family = "unix")]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(test)]
pub mod test;

/// CLI arguments for configuring the ingestion service.
#[derive(Debug, Clone, Parser)]
#[command(name = "eventpipe-ingest")]
#[command(bin_name = "eventpipe-ingest")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// network interface to bind the ingestion http server to
    #[arg(
        long,
        short = 'b',
        value_name = "INTERFACE",
        default_value = "127.0.0.1:8000"
    )]
    pub bind: Interface,

    /// maximum number of events that can wait in the queue
    #[arg(long, value_name = "N", default_value_t = DEFAULT_CAPACITY)]
    pub capacity: usize,

    /// number of background consumers
    #[arg(long, value_name = "N", default_value_t = 4)]
    pub consumers: usize,

    /// simulated processing time per event
    #[arg(long = "work-ms", value_name = "MILLISECONDS", default_value_t = 1)]
    pub work_ms: u64,

    /// probability (0.0 ..= 1.0) that processing an event fails
    #[arg(long = "fault-rate", value_name = "RATE", default_value_t = 0.)]
    pub fault_rate: f64,

    /// processing of a single event is abandoned (counted as failed) after this time
    #[arg(
        long = "max-processing-ms",
        value_name = "MILLISECONDS",
        default_value_t = 1_000
    )]
    pub max_processing_ms: u64,

    /// directory to write the bound socket address (`ingest.addr.txt`) into
    #[arg(long, short = 'D')]
    pub data: Option<PathBuf>,

    /// debug logging as default instead of Info; use RUST_LOG env for more options
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,

    /// enable pretty logging (format for humans)
    #[arg(long, default_value_t = false)]
    pub pretty: bool,

    /// write the tracing output to the provided (log) file instead of stderr
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "SECONDS", default_value_t = 5.)]
    /// the graceful shutdown timeout (<= 0.0 = no timeout)
    pub graceful: f64,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    utils::telemetry::init_tracing(utils::telemetry::TelemetryConfig {
        verbose: args.verbose,
        pretty: args.pretty,
        output: args.output.as_deref(),
    })?;

    let base_shutdown_signal = graceful::default_signal();
    if let Err(err) = run_with_args(base_shutdown_signal, args).await {
        eprintln!("🚩 exit with error: {err}");
        std::process::exit(1);
    }

    Ok(())
}

/// Runs the ingestion server and its consumer pool and blocks until
/// a critical error occurs or the (graceful) shutdown has been initiated.
///
/// This entry point is used by both the (binary) `main` function as well as
/// for the e2e test suite found in the test module.
async fn run_with_args<F>(base_shutdown_signal: F, args: Args) -> Result<(), BoxError>
where
    F: Future<Output: Send + 'static> + Send + 'static,
{
    if !(0.0..=1.0).contains(&args.fault_rate) {
        return Err(BoxError::from("fault rate has to be within 0.0 ..= 1.0")
            .context_field("fault_rate", args.fault_rate));
    }

    if let Some(ref dir) = args.data {
        tokio::fs::create_dir_all(dir)
            .await
            .context("create data directory")
            .with_context_debug_field("path", || dir.clone())?;
    }

    let graceful_timeout = (args.graceful > 0.).then(|| Duration::from_secs_f64(args.graceful));

    let (error_tx, error_rx) = tokio::sync::mpsc::channel::<BoxError>(1);
    let graceful = graceful::Shutdown::new(new_shutdown_signal(error_rx, base_shutdown_signal));

    // bind before anything is spawned, so a bad interface fails the process
    let tcp_listener = TcpListener::bind(args.bind.clone(), Executor::graceful(graceful.guard()))
        .await
        .context("bind ingest http server")
        .with_context_debug_field("interface", || args.bind.clone())?;

    let queue = EventQueue::new(args.capacity);
    let pool = ConsumerPool::start(
        queue.clone(),
        SimulatedProcessor::new(Duration::from_millis(args.work_ms), args.fault_rate),
        ConsumerPoolConfig {
            workers: args.consumers,
            max_processing_time: Duration::from_millis(args.max_processing_ms),
        },
    );

    let state = IngestState {
        queue,
        consumers: pool.stats(),
    };

    graceful.spawn_task_fn(|guard| run_consumer_pool(guard, pool));

    graceful.spawn_task_fn(move |guard| {
        run_ingest_server(args, guard, error_tx, tcp_listener, state)
    });

    let delay = match graceful_timeout {
        Some(duration) => match graceful.shutdown_with_limit(duration).await {
            Ok(delay) => delay,
            Err(err) => {
                tracing::warn!(
                    "graceful shutdown limit reached, events still queued are dropped: {err}"
                );
                return Ok(());
            }
        },
        None => graceful.shutdown().await,
    };

    tracing::info!("gracefully shutdown with a delay of: {delay:?}");
    Ok(())
}

async fn run_consumer_pool(guard: ShutdownGuard, pool: ConsumerPool) {
    guard.cancelled().await;
    pool.drain()
        .instrument(tracing::debug_span!(
            "consumer pool drain",
            server.service.name = format!("{}-consumers", utils::env::project_name()),
        ))
        .await;
}

async fn run_ingest_server(
    args: Args,
    guard: ShutdownGuard,
    error_tx: tokio::sync::mpsc::Sender<BoxError>,
    tcp_listener: TcpListener,
    state: IngestState,
) {
    tracing::info!("spawning ingest http server...");
    if let Err(err) = server::ingest::run_ingest_server(args, guard, tcp_listener, state)
        .instrument(tracing::debug_span!(
            "ingest server lifetime",
            server.service.name = utils::env::project_name(),
            otel.kind = "server",
            network.protocol.name = "http",
        ))
        .await
    {
        tracing::error!("ingest server exited with an error: {err}");
        let _ = error_tx.send(err).await;
    }
}

fn new_shutdown_signal(
    error_rx: tokio::sync::mpsc::Receiver<BoxError>,
    base_shutdown_signal: impl Future<Output: Send + 'static> + Send + 'static,
) -> impl Future + Send + 'static {
    async move {
        let mut mut_error_rx = error_rx;
        let mut signal = Box::pin(base_shutdown_signal);

        tokio::select! {
            _ = signal.as_mut() => {
                tracing::debug!("default signal triggered: init graceful shutdown");
            }
            err = mut_error_rx.recv() => {
                if let Some(err) = err {
                    tracing::error!("fatal err received: {err}; abort");
                } else {
                    tracing::info!("wait for default signal, no error was received");
                    signal.await;
                    tracing::debug!("default signal triggered: init graceful shutdown");
                }
            }
        }
    }
}
