use std::{
    error::Error as StdError,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::SystemTime,
};

use async_trait::async_trait;
use reqwest::{Method, header::CONTENT_TYPE};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use zulip_core::{
    ApiError, ApiErrorKind, ArgEncoding, Outcome, RawFailure, RequestArgs, ResponseBody, Verb,
    classify,
};

use crate::{
    connection::{ClientOptions, Connection},
    observer::{RequestObserver, RequestRecord},
};

/// Executes a single request and never fails across its boundary.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, verb: Verb, endpoint: &str, args: &RequestArgs) -> Outcome;
}

/// Failure to construct the underlying HTTP client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// reqwest-backed transport with basic auth and a fixed per-call deadline.
pub struct HttpTransport {
    connection: Arc<Connection>,
    http: reqwest::Client,
    observer: Arc<dyn RequestObserver>,
}

impl HttpTransport {
    pub fn new(
        connection: Arc<Connection>,
        options: &ClientOptions,
        observer: Arc<dyn RequestObserver>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()?;
        Ok(Self {
            connection,
            http,
            observer,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    async fn send(&self, verb: Verb, endpoint: &str, args: &RequestArgs) -> Outcome {
        let url = self.connection.endpoint_url(endpoint);
        let mut request = self
            .http
            .request(method_for(verb), &url)
            .basic_auth(self.connection.username(), Some(self.connection.api_key()));
        if !args.is_empty() {
            request = match verb.encoding() {
                ArgEncoding::Query => request.query(args),
                ArgEncoding::Form => request.form(args),
            };
        }

        debug!(verb = verb.as_str(), %url, "sending request");
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return Err(classify(endpoint, raw_failure(&err))),
        };

        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(is_json_content_type);
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return Err(classify(endpoint, raw_failure(&err))),
        };

        if !status.is_success() {
            return Err(classify(
                endpoint,
                RawFailure::Status {
                    status: status.as_u16(),
                    body,
                },
            ));
        }
        decode_body(endpoint, is_json, body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, verb: Verb, endpoint: &str, args: &RequestArgs) -> Outcome {
        let outcome = self.send(verb, endpoint, args).await;
        let record = RequestRecord {
            timestamp: SystemTime::now(),
            verb,
            endpoint,
            args,
            outcome: &outcome,
        };
        if catch_unwind(AssertUnwindSafe(|| self.observer.observe(&record))).is_err() {
            debug!(endpoint, "request observer panicked; ignoring");
        }
        outcome
    }
}

fn method_for(verb: Verb) -> Method {
    match verb {
        Verb::Get => Method::GET,
        Verb::Post => Method::POST,
        Verb::Patch => Method::PATCH,
        Verb::Delete => Method::DELETE,
    }
}

fn is_json_content_type(value: &str) -> bool {
    let mime = value.split(';').next().unwrap_or_default().trim();
    mime.eq_ignore_ascii_case("application/json") || mime.to_ascii_lowercase().ends_with("+json")
}

fn decode_body(endpoint: &str, is_json: bool, body: String) -> Outcome {
    if !is_json {
        return Ok(ResponseBody::Raw(body));
    }
    serde_json::from_str::<Map<String, Value>>(&body)
        .map(ResponseBody::Json)
        .map_err(|err| {
            ApiError::new(ApiErrorKind::Generic, endpoint, "invalid JSON response body")
                .with_cause(err.to_string())
        })
}

/// Sort a reqwest failure into the classifier's input categories.
pub(crate) fn raw_failure(err: &reqwest::Error) -> RawFailure {
    let chain = error_chain(err);
    if err.is_timeout() {
        RawFailure::Timeout(chain)
    } else if is_resolution_failure(&chain) {
        RawFailure::UnknownHost(chain)
    } else {
        RawFailure::Transport(chain)
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

fn is_resolution_failure(chain: &str) -> bool {
    let chain = chain.to_ascii_lowercase();
    [
        "dns error",
        "failed to lookup address",
        "name or service not known",
        "no such host",
    ]
    .iter()
    .any(|marker| chain.contains(marker))
}
