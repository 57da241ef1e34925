use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ApiError, ApiErrorKind};

/// Event type the server uses to keep a long poll alive.
pub const HEARTBEAT_EVENT_TYPE: &str = "heartbeat";

/// Result of one request: decoded body or typed failure.
pub type Outcome = Result<ResponseBody, ApiError>;

/// HTTP verb selected for a logical operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Patch,
    Delete,
}

/// Where request arguments are placed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgEncoding {
    /// URL query string.
    Query,
    /// `application/x-www-form-urlencoded` body.
    Form,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    pub fn encoding(self) -> ArgEncoding {
        match self {
            Self::Post => ArgEncoding::Form,
            Self::Get | Self::Patch | Self::Delete => ArgEncoding::Query,
        }
    }
}

/// Flat string arguments for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct RequestArgs(BTreeMap<String, String>);

impl RequestArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value in its string form; a [`Value`] list or object is
    /// written as a JSON document.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Decoded success body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ResponseBody {
    /// JSON object body.
    Json(Map<String, Value>),
    /// Body of a response that did not declare a JSON content type.
    Raw(String),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Json(map) => Some(map),
            Self::Raw(_) => None,
        }
    }
}

/// One server event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Queue-local sequence number.
    pub id: i64,
    /// Event type, such as `message` or `heartbeat`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Remaining event fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(id: i64, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind == HEARTBEAT_EVENT_TYPE
    }
}

/// Server-side event queue handed out by registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventQueueRegistration {
    pub queue_id: String,
    pub last_event_id: i64,
    #[serde(default)]
    pub max_message_id: Option<i64>,
}

impl EventQueueRegistration {
    /// Decode a registration from a `register` response body.
    pub fn from_response(endpoint: &str, body: &ResponseBody) -> Result<Self, ApiError> {
        decode_field_set(endpoint, body)
    }
}

#[derive(Deserialize)]
struct EventsResponse {
    events: Vec<Event>,
}

/// Decode the ordered event list from an `events` response body.
pub fn decode_events(endpoint: &str, body: &ResponseBody) -> Result<Vec<Event>, ApiError> {
    decode_field_set::<EventsResponse>(endpoint, body).map(|response| response.events)
}

fn decode_field_set<T: for<'de> Deserialize<'de>>(
    endpoint: &str,
    body: &ResponseBody,
) -> Result<T, ApiError> {
    let Some(map) = body.as_json() else {
        return Err(ApiError::new(
            ApiErrorKind::Generic,
            endpoint,
            "expected a JSON response body",
        ));
    };
    serde_json::from_value(Value::Object(map.clone())).map_err(|err| {
        ApiError::new(ApiErrorKind::Generic, endpoint, "unexpected response shape")
            .with_cause(err.to_string())
    })
}

/// Whether a subscription re-registers on transient failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SubscriptionMode {
    /// Reconnect on retryable failures.
    #[default]
    Durable,
    /// Surface the first failure and stop.
    NonDurable,
}

/// Item delivered on a subscription's output channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SubscriptionItem {
    /// A non-heartbeat server event.
    Event(Event),
    /// The failure that ended the subscription.
    Error(ApiError),
    /// The poll stream ended without an outcome.
    Closed,
    /// The event queue expired server-side.
    TimedOut,
}

/// Terminal state a subscription loop exits with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionExit {
    /// Cancelled by the caller, or reconnection gave up.
    Killed,
    /// The poll stream or the consumer went away.
    Closed,
    /// Polling timed out.
    TimedOut,
    /// A failure was surfaced to the consumer.
    Failed(ApiError),
}
