#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use rama::{
    error::{BoxError, ErrorContext as _},
    graceful,
    rt::Executor,
    telemetry::tracing::{self, Instrument as _},
};

use clap::Parser;
use parking_lot::Mutex;

use eventpipe_ingest_lib::utils;

pub mod config;
pub mod dispatch;
pub mod pacer;
pub mod payload;
pub mod reporter;

use self::{
    config::{BackpressureMode, GeneratorConfig, RawGeneratorConfig},
    payload::{PayloadSource, render_batch},
    reporter::{HumanReporter, JsonlReporter, Reporter},
};

#[cfg(target_family = "unix")]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// CLI arguments for configuring the event generator.
#[derive(Debug, Clone, Parser)]
#[command(name = "loadgen")]
#[command(bin_name = "loadgen")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// ingestion endpoint to send the events to
    #[arg(long, value_name = "URL", default_value = "http://localhost:8000/events")]
    pub url: String,

    /// aggregate requests per second across all workers
    #[arg(long, value_name = "RPS", default_value_t = 50.)]
    pub rps: f64,

    /// run duration (0 = until interrupted)
    #[arg(long, value_name = "SECONDS", default_value_t = 10.)]
    pub duration: f64,

    /// number of concurrent workers, each with at most one request in flight
    #[arg(long, value_name = "N", default_value_t = 4)]
    pub concurrency: usize,

    /// events per request
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub batch: usize,

    /// payload: inline JSON, a `.json` file or a `.hbs` template
    /// (built-in page view event when absent)
    #[arg(long, value_name = "PAYLOAD")]
    pub payload: Option<String>,

    /// upper bound of the random delay added to every send
    #[arg(long = "jitter-ms", value_name = "MILLISECONDS", default_value_t = 50)]
    pub jitter_ms: u64,

    /// per-request timeout
    #[arg(long, value_name = "SECONDS", default_value_t = 10.)]
    pub timeout: f64,

    /// what to do with a batch rejected by the server (429 / 503)
    #[arg(long = "on-backpressure", value_enum, default_value_t = BackpressureMode::Count)]
    pub on_backpressure: BackpressureMode,

    /// maximum number of re-sends of a rejected batch (`--on-backpressure retry`)
    #[arg(long = "max-retries", value_name = "N", default_value_t = 3)]
    pub max_retries: u32,

    /// report json lines instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    pub json: bool,

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
    /// the graceful shutdown timeout for in-flight requests (<= 0.0 = no timeout)
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

const SUMMARY_FLUSH_MARGIN: Duration = Duration::from_secs(1);

/// Validates the configuration, then generates load until the duration
/// elapses or the (graceful) shutdown has been initiated.
async fn run_with_args<F>(base_shutdown_signal: F, args: Args) -> Result<(), BoxError>
where
    F: Future<Output: Send + 'static> + Send + 'static,
{
    let cfg = GeneratorConfig::try_from(RawGeneratorConfig {
        url: &args.url,
        rps: args.rps,
        duration: args.duration,
        concurrency: args.concurrency,
        batch: args.batch,
        jitter_ms: args.jitter_ms,
        timeout: args.timeout,
        graceful: args.graceful,
        on_backpressure: args.on_backpressure,
        max_retries: args.max_retries,
    })
    .context("validate generator config")?;

    let source = PayloadSource::load(args.payload.as_deref()).context("load payload")?;
    render_batch(&source, 0, 0, 1).context("render payload sample")?;

    dispatch::check_target_reachable(&cfg.target_url, cfg.request_timeout)
        .await
        .context("check target reachability")
        .with_context_field("url", || cfg.target_url.clone())?;

    // in-flight requests are abandoned when the drain window closes,
    // the hard limit sits one margin later so the final summary is written
    let graceful_timeout = cfg
        .drain_timeout
        .map(|drain| drain.saturating_add(SUMMARY_FLUSH_MARGIN));

    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let failure: Arc<Mutex<Option<BoxError>>> = Default::default();

    let graceful = graceful::Shutdown::new(new_shutdown_signal(done_rx, base_shutdown_signal));

    let client = dispatch::new_web_client(Executor::graceful(graceful.guard()))
        .context("create generator web client")?;

    let reporter: Box<dyn Reporter> = if args.json {
        const EMIT_EVENTS: bool = true;
        Box::new(JsonlReporter::stdout(EMIT_EVENTS))
    } else {
        Box::new(HumanReporter::stdout())
    };

    graceful.spawn_task_fn({
        let failure = failure.clone();
        async move |guard| {
            let result = dispatch::run_generator(
                guard,
                Arc::new(cfg),
                client,
                Arc::new(source),
                reporter,
            )
            .instrument(tracing::debug_span!(
                "generator run",
                service.name = format!("{}-loadgen", utils::env::project_name()),
            ))
            .await;

            match result {
                Ok(state) => tracing::info!(
                    reason = state.stop_reason.map(|r| r.as_str()),
                    sent = state.sent,
                    accepted = state.accepted,
                    rejected = state.rejected,
                    errors = state.errors,
                    "generator run finished",
                ),
                Err(err) => {
                    tracing::error!("generator run failed: {err}");
                    *failure.lock() = Some(err);
                }
            }

            drop(done_tx);
        }
    });

    let delay = match graceful_timeout {
        Some(duration) => match graceful.shutdown_with_limit(duration).await {
            Ok(delay) => delay,
            Err(err) => {
                tracing::warn!("graceful shutdown limit reached, in-flight requests are dropped: {err}");
                return Ok(());
            }
        },
        None => graceful.shutdown().await,
    };

    tracing::debug!("gracefully shutdown with a delay of: {delay:?}");

    match failure.lock().take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn new_shutdown_signal(
    done_rx: tokio::sync::oneshot::Receiver<()>,
    base_shutdown_signal: impl Future<Output: Send + 'static> + Send + 'static,
) -> impl Future + Send + 'static {
    async move {
        tokio::select! {
            _ = base_shutdown_signal => {
                tracing::debug!("default signal triggered: init graceful shutdown");
            }
            _ = done_rx => {
                tracing::debug!("generator run is finished, return control");
            }
        }
    }
}
