//! Immutable run configuration, validated once before any traffic is sent.

use std::{fmt, time::Duration};

use clap::ValueEnum;
use rama::http::Uri;

/// What a worker does with a batch the server rejected (429 / 503).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackpressureMode {
    /// count the rejection and move on to a fresh batch
    #[default]
    Count,
    /// re-send the same batch on the next cadence tick
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    Count,
    Retry { max_retries: u32 },
}

impl BackpressurePolicy {
    /// Whether a batch rejected on attempt `attempt` (0-based) is sent again.
    pub fn should_retry(self, attempt: u32) -> bool {
        match self {
            BackpressurePolicy::Count => false,
            BackpressurePolicy::Retry { max_retries } => attempt < max_retries,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub target_url: Uri,
    /// aggregate requests per second across all workers
    pub rps: f64,
    /// `None` runs until cancelled
    pub duration: Option<Duration>,
    pub concurrency: usize,
    /// nominal time between two sends of a single worker (`concurrency / rps`)
    pub worker_interval: Duration,
    pub batch_size: usize,
    pub jitter: Duration,
    pub request_timeout: Duration,
    /// how long in-flight requests may still take once the run is cancelled,
    /// `None` waits for them to complete (or time out)
    pub drain_timeout: Option<Duration>,
    pub on_backpressure: BackpressurePolicy,
}

/// Raw, unvalidated generator parameters as received from the CLI.
#[derive(Debug, Clone)]
pub struct RawGeneratorConfig<'a> {
    pub url: &'a str,
    pub rps: f64,
    pub duration: f64,
    pub concurrency: usize,
    pub batch: usize,
    pub jitter_ms: u64,
    pub timeout: f64,
    pub graceful: f64,
    pub on_backpressure: BackpressureMode,
    pub max_retries: u32,
}

impl TryFrom<RawGeneratorConfig<'_>> for GeneratorConfig {
    type Error = ConfigError;

    fn try_from(raw: RawGeneratorConfig<'_>) -> Result<Self, Self::Error> {
        let target_url = parse_target_url(raw.url)?;

        if !(raw.rps.is_finite() && raw.rps > 0.) {
            return Err(ConfigError::InvalidRps(raw.rps));
        }
        if !(raw.duration.is_finite() && raw.duration >= 0.) {
            return Err(ConfigError::InvalidDuration(raw.duration));
        }
        if raw.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if raw.batch == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if !(raw.timeout.is_finite() && raw.timeout > 0.) {
            return Err(ConfigError::InvalidTimeout(raw.timeout));
        }
        if raw.graceful.is_nan() {
            return Err(ConfigError::InvalidGraceful(raw.graceful));
        }

        let duration = if raw.duration > 0. {
            Some(
                Duration::try_from_secs_f64(raw.duration)
                    .map_err(|_| ConfigError::InvalidDuration(raw.duration))?,
            )
        } else {
            None
        };
        let worker_interval = Duration::try_from_secs_f64(raw.concurrency as f64 / raw.rps)
            .ok()
            .filter(|interval| !interval.is_zero())
            .ok_or(ConfigError::InvalidRps(raw.rps))?;
        let request_timeout = Duration::try_from_secs_f64(raw.timeout)
            .map_err(|_| ConfigError::InvalidTimeout(raw.timeout))?;
        let drain_timeout = if raw.graceful > 0. {
            Some(
                Duration::try_from_secs_f64(raw.graceful)
                    .map_err(|_| ConfigError::InvalidGraceful(raw.graceful))?,
            )
        } else {
            None
        };

        Ok(Self {
            target_url,
            rps: raw.rps,
            duration,
            concurrency: raw.concurrency,
            worker_interval,
            batch_size: raw.batch,
            jitter: Duration::from_millis(raw.jitter_ms),
            request_timeout,
            drain_timeout,
            on_backpressure: match raw.on_backpressure {
                BackpressureMode::Count => BackpressurePolicy::Count,
                BackpressureMode::Retry => BackpressurePolicy::Retry {
                    max_retries: raw.max_retries,
                },
            },
        })
    }
}

fn parse_target_url(raw: &str) -> Result<Uri, ConfigError> {
    let uri: Uri = raw
        .parse()
        .map_err(|err| ConfigError::InvalidUrl(format!("{raw}: {err}")))?;

    match uri.scheme_str() {
        Some("http" | "https") => (),
        _ => {
            return Err(ConfigError::InvalidUrl(format!(
                "{raw}: scheme has to be http or https"
            )));
        }
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(ConfigError::InvalidUrl(format!("{raw}: missing host")));
    }

    Ok(uri)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidUrl(String),
    InvalidRps(f64),
    InvalidDuration(f64),
    InvalidTimeout(f64),
    InvalidGraceful(f64),
    ZeroConcurrency,
    ZeroBatch,
    PayloadNotFound { source: String, tried: Vec<String> },
    UnsupportedPayload(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidUrl(msg) => write!(f, "invalid target url: {msg}"),
            ConfigError::InvalidRps(rps) => write!(
                f,
                "rps has to be > 0 and give a representable worker interval (got {rps})"
            ),
            ConfigError::InvalidDuration(d) => {
                write!(f, "duration has to be >= 0 and representable (got {d})")
            }
            ConfigError::InvalidTimeout(t) => {
                write!(f, "timeout has to be > 0 and representable (got {t})")
            }
            ConfigError::InvalidGraceful(g) => {
                write!(f, "graceful timeout has to be a representable number (got {g})")
            }
            ConfigError::ZeroConcurrency => write!(f, "concurrency has to be at least 1"),
            ConfigError::ZeroBatch => write!(f, "batch size has to be at least 1"),
            ConfigError::PayloadNotFound { source, tried } => write!(
                f,
                "payload source not found: {source} (tried: {})",
                tried.join(", ")
            ),
            ConfigError::UnsupportedPayload(path) => write!(
                f,
                "unsupported payload file type: {path} (use .json or .hbs)"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
