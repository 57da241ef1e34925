use std::sync::Arc;

use serde_json::{Value, json};
use zulip_core::{
    ApiError, ApiErrorKind, Event, EventQueueRegistration, Outcome, RequestArgs, Verb,
    decode_events,
};

use crate::{
    connection::{ClientOptions, Connection},
    dispatcher::{PendingRequest, RequestDispatcher},
    observer::{RequestObserver, TracingObserver},
    subscription::{SubscribeOptions, SubscriptionHandle, spawn_subscription},
    transport::{ClientError, HttpTransport, Transport},
};

pub(crate) const REGISTER_ENDPOINT: &str = "register";
pub(crate) const EVENTS_ENDPOINT: &str = "events";
const MESSAGES_ENDPOINT: &str = "messages";
const SUBSCRIPTIONS_ENDPOINT: &str = "users/me/subscriptions";
const MEMBERS_ENDPOINT: &str = "users";

pub(crate) fn register_args(event_types: &[String], apply_markdown: bool) -> RequestArgs {
    let args = RequestArgs::new().with("apply_markdown", apply_markdown);
    if event_types.is_empty() {
        args
    } else {
        args.with("event_types", Value::from(event_types.to_vec()))
    }
}

pub(crate) fn events_args(queue_id: &str, last_event_id: i64, dont_block: bool) -> RequestArgs {
    RequestArgs::new()
        .with("queue_id", queue_id)
        .with("last_event_id", last_event_id)
        .with("dont_block", dont_block)
}

/// Chat-service API client.
///
/// Cheap to clone; clones share the connection and HTTP pool.
#[derive(Clone)]
pub struct ZulipClient {
    connection: Arc<Connection>,
    dispatcher: RequestDispatcher,
    options: ClientOptions,
}

impl ZulipClient {
    /// Client with production timeouts that logs requests through `tracing`.
    pub fn new(connection: Connection) -> Result<Self, ClientError> {
        Self::with_observer(connection, ClientOptions::default(), Arc::new(TracingObserver))
    }

    pub fn with_observer(
        connection: Connection,
        options: ClientOptions,
        observer: Arc<dyn RequestObserver>,
    ) -> Result<Self, ClientError> {
        let connection = Arc::new(connection);
        let transport = HttpTransport::new(Arc::clone(&connection), &options, observer)?;
        Ok(Self::with_transport(connection, Arc::new(transport), options))
    }

    /// Client over a caller-supplied transport.
    pub fn with_transport(
        connection: Arc<Connection>,
        transport: Arc<dyn Transport>,
        options: ClientOptions,
    ) -> Self {
        Self {
            connection,
            dispatcher: RequestDispatcher::new(transport),
            options,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Issue an arbitrary request.
    pub fn request(&self, verb: Verb, endpoint: &str, args: RequestArgs) -> PendingRequest {
        self.dispatcher.request(verb, endpoint, args)
    }

    pub async fn register_queue(
        &self,
        event_types: &[String],
        apply_markdown: bool,
    ) -> Result<EventQueueRegistration, ApiError> {
        let body = self
            .call(
                Verb::Post,
                REGISTER_ENDPOINT,
                register_args(event_types, apply_markdown),
            )
            .await?;
        EventQueueRegistration::from_response(REGISTER_ENDPOINT, &body)
    }

    /// One poll of an event queue; heartbeats are returned as-is.
    pub async fn get_events(
        &self,
        queue_id: &str,
        last_event_id: i64,
        dont_block: bool,
    ) -> Result<Vec<Event>, ApiError> {
        let body = self
            .call(
                Verb::Get,
                EVENTS_ENDPOINT,
                events_args(queue_id, last_event_id, dont_block),
            )
            .await?;
        decode_events(EVENTS_ENDPOINT, &body)
    }

    pub async fn send_stream_message(&self, stream: &str, topic: &str, content: &str) -> Outcome {
        let args = RequestArgs::new()
            .with("type", "stream")
            .with("to", stream)
            .with("topic", topic)
            .with("content", content);
        self.call(Verb::Post, MESSAGES_ENDPOINT, args).await
    }

    pub async fn send_private_message(&self, recipients: &[String], content: &str) -> Outcome {
        let args = RequestArgs::new()
            .with("type", "private")
            .with("to", Value::from(recipients.to_vec()))
            .with("content", content);
        self.call(Verb::Post, MESSAGES_ENDPOINT, args).await
    }

    pub async fn list_subscriptions(&self) -> Outcome {
        self.call(Verb::Get, SUBSCRIPTIONS_ENDPOINT, RequestArgs::new())
            .await
    }

    pub async fn subscribe_streams(&self, streams: &[String]) -> Outcome {
        let subscriptions: Vec<Value> = streams
            .iter()
            .map(|name| json!({ "name": name }))
            .collect();
        let args = RequestArgs::new().with("subscriptions", Value::from(subscriptions));
        self.call(Verb::Post, SUBSCRIPTIONS_ENDPOINT, args).await
    }

    pub async fn unsubscribe_streams(&self, streams: &[String]) -> Outcome {
        let args = RequestArgs::new().with("subscriptions", Value::from(streams.to_vec()));
        self.call(Verb::Delete, SUBSCRIPTIONS_ENDPOINT, args).await
    }

    pub async fn list_members(&self) -> Outcome {
        self.call(Verb::Get, MEMBERS_ENDPOINT, RequestArgs::new()).await
    }

    /// Start a long-polling subscription on its own task.
    pub fn subscribe_events(&self, options: SubscribeOptions) -> SubscriptionHandle {
        spawn_subscription(self.dispatcher.clone(), self.options.reconnect, options)
    }

    async fn call(&self, verb: Verb, endpoint: &str, args: RequestArgs) -> Outcome {
        self.dispatcher
            .request(verb, endpoint, args)
            .await
            .unwrap_or_else(|| {
                Err(ApiError::new(
                    ApiErrorKind::Generic,
                    endpoint,
                    "request ended without an outcome",
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use zulip_core::SubscriptionItem;

    use super::*;
    use crate::testing::{ScriptedTransport, Step, failure, json as json_body};

    fn client_over(transport: &Arc<ScriptedTransport>) -> ZulipClient {
        ZulipClient::with_transport(
            Arc::new(Connection::new("bot@example.com", "key", "https://chat.example.com/api/v1")),
            transport.clone(),
            ClientOptions::default(),
        )
    }

    #[test]
    fn register_args_omit_empty_event_types() {
        let args = register_args(&[], false);
        assert_eq!(args.get("event_types"), None);
        assert_eq!(args.get("apply_markdown"), Some("false"));

        let args = register_args(&["message".to_owned(), "typing".to_owned()], true);
        assert_eq!(args.get("event_types"), Some(r#"["message","typing"]"#));
    }

    #[tokio::test]
    async fn register_queue_decodes_registration() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(
            "register",
            Step::Reply(json_body(serde_json::json!({
                "result": "success",
                "queue_id": "abc",
                "last_event_id": -1,
                "max_message_id": 99
            }))),
        );
        let client = client_over(&transport);

        let registration = client
            .register_queue(&["message".to_owned()], false)
            .await
            .expect("registration");
        assert_eq!(registration.queue_id, "abc");
        assert_eq!(registration.max_message_id, Some(99));
    }

    #[tokio::test]
    async fn get_events_returns_heartbeats_unfiltered() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(
            "events",
            Step::Reply(json_body(serde_json::json!({
                "events": [{"id": 4, "type": "heartbeat"}]
            }))),
        );
        let client = client_over(&transport);

        let events = client.get_events("abc", 3, true).await.expect("events");
        assert!(events[0].is_heartbeat());
        assert_eq!(transport.calls_to("events")[0].get("dont_block"), Some("true"));
    }

    #[tokio::test]
    async fn message_wrappers_fill_expected_arguments() {
        let transport = Arc::new(ScriptedTransport::default());
        transport
            .push("messages", Step::Reply(json_body(serde_json::json!({"id": 1}))))
            .push("messages", Step::Reply(failure(ApiErrorKind::BadRequest, "messages")));
        let client = client_over(&transport);

        client
            .send_stream_message("general", "greetings", "hello")
            .await
            .expect("stream message");
        let err = client
            .send_private_message(&["a@example.com".to_owned()], "psst")
            .await
            .expect_err("scripted failure");
        assert_eq!(err.kind, ApiErrorKind::BadRequest);

        let calls = transport.calls_to("messages");
        assert_eq!(calls[0].get("type"), Some("stream"));
        assert_eq!(calls[0].get("topic"), Some("greetings"));
        assert_eq!(calls[1].get("to"), Some(r#"["a@example.com"]"#));
    }

    #[tokio::test]
    async fn subscription_wrappers_encode_stream_lists() {
        let transport = Arc::new(ScriptedTransport::default());
        for _ in 0..2 {
            transport.push(
                "users/me/subscriptions",
                Step::Reply(json_body(serde_json::json!({"result": "success"}))),
            );
        }
        let client = client_over(&transport);
        let streams = vec!["general".to_owned()];

        client.subscribe_streams(&streams).await.expect("subscribe");
        client.unsubscribe_streams(&streams).await.expect("unsubscribe");

        let calls = transport.calls_to("users/me/subscriptions");
        assert_eq!(calls[0].get("subscriptions"), Some(r#"[{"name":"general"}]"#));
        assert_eq!(calls[1].get("subscriptions"), Some(r#"["general"]"#));
    }

    #[tokio::test]
    async fn aborted_request_becomes_generic_error() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push("users", Step::Abort);
        let client = client_over(&transport);

        let err = client.list_members().await.expect_err("aborted");
        assert_eq!(err.kind, ApiErrorKind::Generic);
        assert_eq!(err.endpoint, "users");
    }

    #[tokio::test]
    async fn subscribe_events_uses_client_dispatcher() {
        let transport = Arc::new(ScriptedTransport::default());
        transport
            .push(
                "register",
                Step::Reply(json_body(serde_json::json!({"queue_id": "q", "last_event_id": -1}))),
            )
            .push(
                "events",
                Step::Reply(json_body(serde_json::json!({
                    "events": [{"id": 0, "type": "stream"}]
                }))),
            );
        let client = client_over(&transport);

        let mut handle = client.subscribe_events(SubscribeOptions::default());
        match handle.next().await {
            Some(SubscriptionItem::Event(event)) => assert_eq!(event.kind, "stream"),
            other => panic!("unexpected item: {other:?}"),
        }
        handle.cancel();
        handle.finish().await;
    }
}
