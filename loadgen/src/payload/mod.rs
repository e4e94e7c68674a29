//! Payload rendering: one JSON object per event, from a fresh [`RenderContext`].

use std::{fmt, path::Path};

use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
};
use rand::{Rng as _, seq::IndexedRandom as _};
use serde::Serialize;
use serde_json::{Map, Value, json};

use eventpipe_ingest_lib::utils::time::{now_rfc3339_millis, now_unix_ms};

use crate::config::ConfigError;

mod resolve;
mod template;

pub use self::{
    resolve::{payload_path_candidates, resolve_payload_path},
    template::TemplateRenderer,
};

/// Per-event values exposed to payload templates.
#[derive(Debug, Clone, Serialize)]
pub struct RenderContext {
    /// run-wide sequence number
    pub seq: u64,
    pub worker: usize,
    /// position within the batch
    pub index: usize,
    pub ts_ms: u64,
    pub timestamp: String,
    pub filler: String,
}

impl RenderContext {
    pub fn new(seq: u64, worker: usize, index: usize) -> Self {
        Self {
            seq,
            worker,
            index,
            ts_ms: now_unix_ms(),
            timestamp: now_rfc3339_millis(),
            filler: random_filler(16),
        }
    }
}

/// Renders one event body from a context.
pub trait PayloadRenderer: Send + Sync + 'static {
    fn render(&self, ctx: &RenderContext) -> Result<Map<String, Value>, RenderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// the template itself is malformed
    Template(String),
    MissingField(String),
    Helper(String),
    InvalidJson(String),
    NotAnObject,
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Template(msg) => write!(f, "malformed template: {msg}"),
            RenderError::MissingField(name) => write!(f, "missing template field: {name}"),
            RenderError::Helper(msg) => write!(f, "template helper failed: {msg}"),
            RenderError::InvalidJson(msg) => write!(f, "rendered payload is not valid JSON: {msg}"),
            RenderError::NotAnObject => write!(f, "rendered payload is not a JSON object"),
        }
    }
}

impl std::error::Error for RenderError {}

/// Where event bodies come from.
#[derive(Debug)]
pub enum PayloadSource {
    /// built-in `page_view` event
    Default,
    /// the same object for every event (inline JSON or a `.json` file)
    Static(Map<String, Value>),
    Template(TemplateRenderer),
}

impl PayloadSource {
    /// Loads the source described by the `--payload` argument.
    ///
    /// Inline JSON wins over a path, paths are resolved with
    /// [`resolve_payload_path`].
    pub fn load(source: Option<&str>) -> Result<Self, BoxError> {
        let Some(source) = source else {
            return Ok(PayloadSource::Default);
        };

        if let Ok(value) = serde_json::from_str::<Value>(source) {
            tracing::debug!("payload: inline JSON");
            return into_object(value).map(PayloadSource::Static).map_err(Into::into);
        }

        let path = resolve_payload_path(Path::new(source))?;
        tracing::info!(path = %path.display(), "payload: resolved file");

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                let raw = std::fs::read_to_string(&path)
                    .context("read json payload file")
                    .with_context_debug_field("path", || path.clone())?;
                let value: Value = serde_json::from_str(&raw)
                    .map_err(|err| RenderError::InvalidJson(err.to_string()))
                    .with_context_debug_field("path", || path.clone())?;
                Ok(PayloadSource::Static(into_object(value)?))
            }
            Some("hbs") => {
                let raw = std::fs::read_to_string(&path)
                    .context("read payload template file")
                    .with_context_debug_field("path", || path.clone())?;
                Ok(PayloadSource::Template(TemplateRenderer::try_new(&raw)?))
            }
            _ => Err(ConfigError::UnsupportedPayload(path.display().to_string()).into()),
        }
    }
}

impl PayloadRenderer for PayloadSource {
    fn render(&self, ctx: &RenderContext) -> Result<Map<String, Value>, RenderError> {
        match self {
            PayloadSource::Default => Ok(default_event(ctx)),
            PayloadSource::Static(fields) => Ok(fields.clone()),
            PayloadSource::Template(renderer) => renderer.render(ctx),
        }
    }
}

/// Renders `batch_size` events, the first one at sequence number `first_seq`.
pub fn render_batch<R: PayloadRenderer + ?Sized>(
    renderer: &R,
    worker: usize,
    first_seq: u64,
    batch_size: usize,
) -> Result<Vec<Value>, RenderError> {
    (0..batch_size)
        .map(|index| {
            let ctx = RenderContext::new(first_seq + index as u64, worker, index);
            renderer.render(&ctx).map(Value::Object)
        })
        .collect()
}

fn into_object(value: Value) -> Result<Map<String, Value>, RenderError> {
    match value {
        Value::Object(fields) => Ok(fields),
        _ => Err(RenderError::NotAnObject),
    }
}

const DEFAULT_PATHS: &[&str] = &["/", "/pricing", "/docs", "/blog", "/about", "/signup"];

fn default_event(ctx: &RenderContext) -> Map<String, Value> {
    let mut rng = rand::rng();
    let path = DEFAULT_PATHS.choose(&mut rng).copied().unwrap_or("/");

    let event = json!({
        "event_type": "page_view",
        "user_id": uuid::Uuid::new_v4().to_string(),
        "path": path,
        "value": rng.random_range(0..1_000) as f64 / 10.,
        "ts": ctx.ts_ms,
    });

    match event {
        Value::Object(fields) => fields,
        _ => Map::new(),
    }
}

fn random_filler(len: usize) -> String {
    rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_source_renders_page_views() {
        let source = PayloadSource::load(None).unwrap();
        let batch = render_batch(&source, 0, 0, 3).unwrap();
        assert_eq!(batch.len(), 3);
        for event in batch {
            assert_eq!(event["event_type"], "page_view");
            assert!(event["user_id"].as_str().is_some_and(|id| id.len() == 36));
            assert!(event["value"].as_f64().is_some_and(|v| (0. ..100.).contains(&v)));
        }
    }

    #[test]
    fn inline_json_is_static() {
        let source = PayloadSource::load(Some(r#"{"event_type":"click","value":7}"#)).unwrap();
        let batch = render_batch(&source, 2, 10, 2).unwrap();
        assert_eq!(batch, vec![json!({"event_type":"click","value":7}); 2]);
    }

    #[test]
    fn inline_json_must_be_an_object() {
        let err = PayloadSource::load(Some("[1,2,3]")).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RenderError>(),
            Some(&RenderError::NotAnObject)
        );
    }

    #[test]
    fn unknown_path_is_a_config_error() {
        let err = PayloadSource::load(Some("does/not/exist.hbs")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::PayloadNotFound { .. })
        ));
    }

    #[test]
    fn bundled_payload_files_load() {
        let source = PayloadSource::load(Some("payloads/event.json")).unwrap();
        let batch = render_batch(&source, 0, 0, 1).unwrap();
        assert_eq!(batch[0]["event_type"], "purchase");

        let source = PayloadSource::load(Some("page_view.hbs")).unwrap();
        let batch = render_batch(&source, 3, 40, 2).unwrap();
        assert_eq!(batch[0]["seq"], 40);
        assert_eq!(batch[1]["seq"], 41);
        assert_eq!(batch[1]["index"], 1);
        assert_eq!(batch[0]["worker"], 3);
    }

    #[test]
    fn render_context_is_fresh_per_event() {
        let a = RenderContext::new(1, 0, 0);
        let b = RenderContext::new(2, 0, 1);
        assert_eq!(a.filler.len(), 16);
        assert_ne!(a.filler, b.filler);
        assert!(b.ts_ms >= a.ts_ms);
    }
}
