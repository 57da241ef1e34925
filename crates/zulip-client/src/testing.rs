//! Shared fixtures for unit tests: a loopback HTTP responder, a recording
//! observer and a scripted in-memory transport.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::Notify,
    task::JoinHandle,
};
use zulip_core::{ApiError, ApiErrorKind, Outcome, RequestArgs, ResponseBody, Verb};

use crate::{
    observer::{RequestObserver, RequestRecord},
    transport::Transport,
};

pub(crate) fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Answer exactly one request with `response`; the task yields the raw request text.
pub(crate) async fn serve_once(response: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let request = read_request(&mut socket).await;
        socket
            .write_all(response.as_bytes())
            .await
            .expect("write response");
        let _ = socket.shutdown().await;
        request
    });
    (format!("http://{addr}/api/v1"), task)
}

/// Accept connections and never answer.
pub(crate) async fn silent_listener() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    (format!("http://{addr}/api/v1"), task)
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.expect("read request");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if request_complete(&buf) {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn request_complete(buf: &[u8]) -> bool {
    let text = String::from_utf8_lossy(buf);
    let Some(head_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..head_end]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);
    buf.len() >= head_end + 4 + content_length
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ObservedRequest {
    pub verb: Verb,
    pub endpoint: String,
    pub args: RequestArgs,
    pub kind: Option<ApiErrorKind>,
}

#[derive(Default)]
pub(crate) struct RecordingObserver {
    seen: Mutex<Vec<ObservedRequest>>,
}

impl RecordingObserver {
    pub(crate) fn records(&self) -> Vec<ObservedRequest> {
        self.seen.lock().expect("observer lock").clone()
    }
}

impl RequestObserver for RecordingObserver {
    fn observe(&self, record: &RequestRecord<'_>) {
        self.seen.lock().expect("observer lock").push(ObservedRequest {
            verb: record.verb,
            endpoint: record.endpoint.to_owned(),
            args: record.args.clone(),
            kind: record.outcome.as_ref().err().map(|err| err.kind),
        });
    }
}

/// One scripted response.
pub(crate) enum Step {
    Reply(Outcome),
    /// Never complete.
    Hang,
    /// Wait for `release`, then reply.
    Gate(Arc<Notify>, Outcome),
    /// Panic inside the request task.
    Abort,
}

pub(crate) fn json(value: Value) -> Outcome {
    match value {
        Value::Object(map) => Ok(ResponseBody::Json(map)),
        other => panic!("scripted body must be an object: {other}"),
    }
}

pub(crate) fn failure(kind: ApiErrorKind, endpoint: &str) -> Outcome {
    Err(ApiError::new(kind, endpoint, "scripted failure"))
}

/// Replays queued steps per endpoint and records every call.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    steps: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<(String, RequestArgs)>>,
}

impl ScriptedTransport {
    pub(crate) fn push(&self, endpoint: &str, step: Step) -> &Self {
        self.steps
            .lock()
            .expect("script lock")
            .entry(endpoint.to_owned())
            .or_default()
            .push_back(step);
        self
    }

    pub(crate) fn calls(&self) -> Vec<(String, RequestArgs)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn calls_to(&self, endpoint: &str) -> Vec<RequestArgs> {
        self.calls()
            .into_iter()
            .filter(|(called, _)| called == endpoint)
            .map(|(_, args)| args)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, _verb: Verb, endpoint: &str, args: &RequestArgs) -> Outcome {
        self.calls
            .lock()
            .expect("calls lock")
            .push((endpoint.to_owned(), args.clone()));
        let step = self
            .steps
            .lock()
            .expect("script lock")
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Hang);

        match step {
            Step::Reply(outcome) => outcome,
            Step::Hang => std::future::pending().await,
            Step::Gate(release, outcome) => {
                release.notified().await;
                outcome
            }
            Step::Abort => panic!("scripted transport abort on {endpoint}"),
        }
    }
}
