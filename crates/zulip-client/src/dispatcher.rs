use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tokio::task::JoinHandle;
use tracing::warn;
use zulip_core::{Outcome, RequestArgs, Verb};

use crate::transport::Transport;

/// Runs each request on its own task.
#[derive(Clone)]
pub struct RequestDispatcher {
    transport: Arc<dyn Transport>,
}

impl RequestDispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Start a request and return a handle to await its outcome.
    ///
    /// Must be called from within a tokio runtime.
    pub fn request(
        &self,
        verb: Verb,
        endpoint: impl Into<String>,
        args: RequestArgs,
    ) -> PendingRequest {
        let transport = Arc::clone(&self.transport);
        let endpoint = endpoint.into();
        let task_endpoint = endpoint.clone();
        let task =
            tokio::spawn(async move { transport.execute(verb, &task_endpoint, &args).await });
        PendingRequest { endpoint, task }
    }
}

/// In-flight request.
///
/// Resolves to `None` when the request task ended without an outcome.
/// Dropping it aborts the request.
#[derive(Debug)]
pub struct PendingRequest {
    endpoint: String,
    task: JoinHandle<Outcome>,
}

impl PendingRequest {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Future for PendingRequest {
    type Output = Option<Outcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| match joined {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(
                    endpoint = %self.endpoint,
                    error = %err,
                    "request task ended without outcome"
                );
                None
            }
        })
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use zulip_core::ApiErrorKind;

    use super::*;
    use crate::testing::{ScriptedTransport, Step, failure, json as json_body};

    #[tokio::test]
    async fn delivers_errors_as_values() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push("messages", Step::Reply(failure(ApiErrorKind::BadRequest, "messages")));
        let dispatcher = RequestDispatcher::new(transport.clone());

        let outcome = dispatcher
            .request(Verb::Post, "messages", RequestArgs::new().with("content", "hi"))
            .await
            .expect("request produced an outcome");
        assert_eq!(outcome.expect_err("scripted failure").kind, ApiErrorKind::BadRequest);
        assert_eq!(transport.calls_to("messages")[0].get("content"), Some("hi"));
    }

    #[tokio::test]
    async fn runs_requests_concurrently() {
        let transport = Arc::new(ScriptedTransport::default());
        transport
            .push("slow", Step::Hang)
            .push("fast", Step::Reply(json_body(json!({"ok": true}))));
        let dispatcher = RequestDispatcher::new(transport.clone());

        let slow = dispatcher.request(Verb::Get, "slow", RequestArgs::new());
        let fast = dispatcher.request(Verb::Get, "fast", RequestArgs::new());

        assert!(fast.await.expect("outcome").is_ok());
        assert_eq!(slow.endpoint(), "slow");
    }

    #[tokio::test]
    async fn panicking_request_resolves_to_none() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push("events", Step::Abort);
        let dispatcher = RequestDispatcher::new(transport);

        let outcome = dispatcher
            .request(Verb::Get, "events", RequestArgs::new())
            .await;
        assert!(outcome.is_none());
    }
}
