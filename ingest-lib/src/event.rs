//! Semi-structured events as received by the ingestion endpoint.
//!
//! No schema is enforced beyond "a JSON object". The well-known
//! `event_type` and `value` fields are exposed through accessors.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::time::now_rfc3339_millis;

pub const FIELD_EVENT_TYPE: &str = "event_type";
pub const FIELD_VALUE: &str = "value";
pub const FIELD_RECEIVED_AT: &str = "_received_at";
pub const FIELD_SOURCE: &str = "_source";

/// Default `_source` attached to events that do not declare one.
pub const DEFAULT_SOURCE: &str = "events-generator";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Map<String, Value>);

impl Event {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn event_type(&self) -> Option<&str> {
        self.0.get(FIELD_EVENT_TYPE).and_then(Value::as_str)
    }

    pub fn value(&self) -> Option<f64> {
        self.0.get(FIELD_VALUE).and_then(Value::as_f64)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    /// Adds `_received_at` and `_source` unless the event already carries them.
    fn with_ingest_metadata(mut self, received_at: &str) -> Self {
        self.0
            .entry(FIELD_RECEIVED_AT)
            .or_insert_with(|| Value::String(received_at.to_owned()));
        self.0
            .entry(FIELD_SOURCE)
            .or_insert_with(|| Value::String(DEFAULT_SOURCE.to_owned()));
        self
    }
}

impl From<Map<String, Value>> for Event {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Ordered sequence of events submitted in one ingestion call.
pub type Batch = Vec<Event>;

#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum MalformedBody {
    InvalidJson(String),
    NotAnObject,
    ElementNotAnObject(usize),
}

impl fmt::Display for MalformedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedBody::InvalidJson(err) => write!(f, "invalid JSON: {err}"),
            MalformedBody::NotAnObject => {
                write!(f, "body must be a JSON object or an array of objects")
            }
            MalformedBody::ElementNotAnObject(index) => {
                write!(f, "array element at index {index} is not a JSON object")
            }
        }
    }
}

impl std::error::Error for MalformedBody {}

/// Parses an ingestion body into a batch.
///
/// A single object is a batch of one, an array is a batch of its elements.
/// The whole body is rejected if any element is not an object.
pub fn parse_batch(payload: &[u8]) -> Result<Batch, MalformedBody> {
    let body: Value =
        serde_json::from_slice(payload).map_err(|err| MalformedBody::InvalidJson(err.to_string()))?;

    let received_at = now_rfc3339_millis();

    match body {
        Value::Object(fields) => Ok(vec![Event(fields).with_ingest_metadata(&received_at)]),
        Value::Array(values) => values
            .into_iter()
            .enumerate()
            .map(|(index, value)| match value {
                Value::Object(fields) => Ok(Event(fields).with_ingest_metadata(&received_at)),
                _ => Err(MalformedBody::ElementNotAnObject(index)),
            })
            .collect(),
        _ => Err(MalformedBody::NotAnObject),
    }
}
