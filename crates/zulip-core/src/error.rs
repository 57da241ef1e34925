use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Outcome;

/// Closed set of failure kinds a request can end in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// HTTP 400: the request was malformed.
    BadRequest,
    /// HTTP 401: credentials were rejected.
    Unauthorized,
    /// HTTP 500.
    InternalServerError,
    /// HTTP 502.
    BadGateway,
    /// Connect or read deadline elapsed.
    Timeout,
    /// The server host name could not be resolved.
    UnknownHost,
    /// Any other transport/protocol failure or unrecognized status.
    Generic,
}

impl ApiErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ApiErrorKind; 7] = [
        ApiErrorKind::BadRequest,
        ApiErrorKind::Unauthorized,
        ApiErrorKind::InternalServerError,
        ApiErrorKind::BadGateway,
        ApiErrorKind::Timeout,
        ApiErrorKind::UnknownHost,
        ApiErrorKind::Generic,
    ];

    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::InternalServerError => "internal_server_error",
            Self::BadGateway => "bad_gateway",
            Self::Timeout => "timeout",
            Self::UnknownHost => "unknown_host",
            Self::Generic => "generic",
        }
    }

    /// Whether a blind re-attempt may succeed.
    ///
    /// `BadRequest` and `Unauthorized` need the caller to change the request.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::BadRequest | Self::Unauthorized)
    }
}

/// Typed request failure delivered as ordinary data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{}: {endpoint}: {message}", kind.code())]
pub struct ApiError {
    /// Failure kind.
    pub kind: ApiErrorKind,
    /// Human-readable message (the raw response body for unrecognized statuses).
    pub message: String,
    /// Endpoint the request was sent to, relative to the base URL.
    pub endpoint: String,
    /// Underlying transport error text, when there was one.
    pub cause: Option<String>,
}

impl ApiError {
    pub fn new(
        kind: ApiErrorKind,
        endpoint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            endpoint: endpoint.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Unclassified failure as observed by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
    /// The server answered with a non-success status.
    Status { status: u16, body: String },
    /// Connect or read deadline elapsed.
    Timeout(String),
    /// Host name resolution failed.
    UnknownHost(String),
    /// Any other transport or protocol failure.
    Transport(String),
}

/// Map known HTTP status codes to an error kind.
///
/// Returns `None` for statuses outside the recognized set.
pub fn classify_http_status(status: u16) -> Option<ApiErrorKind> {
    match status {
        400 => Some(ApiErrorKind::BadRequest),
        401 => Some(ApiErrorKind::Unauthorized),
        500 => Some(ApiErrorKind::InternalServerError),
        502 => Some(ApiErrorKind::BadGateway),
        _ => None,
    }
}

/// Turn a raw transport failure into a typed [`ApiError`].
pub fn classify(endpoint: &str, failure: RawFailure) -> ApiError {
    match failure {
        RawFailure::Status { status, body } => match classify_http_status(status) {
            Some(kind) => ApiError::new(kind, endpoint, format!("HTTP {status}: {body}")),
            None => ApiError::new(ApiErrorKind::Generic, endpoint, body)
                .with_cause(format!("unrecognized HTTP status {status}")),
        },
        RawFailure::Timeout(cause) => {
            ApiError::new(ApiErrorKind::Timeout, endpoint, "request timed out").with_cause(cause)
        }
        RawFailure::UnknownHost(cause) => {
            ApiError::new(ApiErrorKind::UnknownHost, endpoint, "unknown host").with_cause(cause)
        }
        RawFailure::Transport(cause) => {
            ApiError::new(ApiErrorKind::Generic, endpoint, "transport failure").with_cause(cause)
        }
    }
}

/// Retry predicate over a request outcome.
///
/// A successful outcome is never a retry trigger.
pub fn retryable(outcome: &Outcome) -> bool {
    match outcome {
        Ok(_) => false,
        Err(err) => err.is_retryable(),
    }
}
