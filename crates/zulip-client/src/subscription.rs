//! Long-polling event subscription loop.
//!
//! One task per subscription races every poll (and every reconnect wait)
//! against the caller's cancellation token, checking cancellation first.
//! Transition decisions come from [`SubscriptionStateMachine`]; this module
//! only performs the I/O those decisions ask for.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zulip_core::{
    ApiError, ApiErrorKind, ChannelError, EventQueueRegistration, InvalidTransition, ItemSink,
    ItemStream, PollOutcome, ReconnectPolicy, SubscriptionExit, SubscriptionItem,
    SubscriptionMode, SubscriptionState, SubscriptionStateMachine, Transition, Verb, decode_events,
    subscription_channel,
};

use crate::{
    api::{EVENTS_ENDPOINT, REGISTER_ENDPOINT, events_args, register_args},
    dispatcher::RequestDispatcher,
};

/// Parameters for [`crate::ZulipClient::subscribe_events`].
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Event types to register for; empty means every type.
    pub event_types: Vec<String>,
    pub apply_markdown: bool,
    pub mode: SubscriptionMode,
    /// Queue registered beforehand; when `None` the loop registers one.
    pub registration: Option<EventQueueRegistration>,
}

/// Consumer side of a running subscription.
#[derive(Debug)]
pub struct SubscriptionHandle {
    events: ItemStream,
    cancel: CancellationToken,
    task: JoinHandle<SubscriptionExit>,
}

impl SubscriptionHandle {
    /// Next item, or `None` once the loop has exited.
    pub async fn next(&mut self) -> Option<SubscriptionItem> {
        self.events.recv().await
    }

    /// Signal cancellation. Calling it again has no effect.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the loop to exit and return its terminal state.
    ///
    /// Dropping the receiver first stops a loop that is still running, which
    /// then exits `Closed`. Items not yet received are discarded.
    pub async fn finish(self) -> SubscriptionExit {
        let Self { events, task, .. } = self;
        drop(events);
        match task.await {
            Ok(exit) => exit,
            Err(err) => {
                warn!(error = %err, "subscription task ended abnormally");
                SubscriptionExit::Closed
            }
        }
    }

    pub fn into_parts(self) -> (ItemStream, CancellationToken, JoinHandle<SubscriptionExit>) {
        (self.events, self.cancel, self.task)
    }
}

pub(crate) fn spawn_subscription(
    dispatcher: RequestDispatcher,
    reconnect: ReconnectPolicy,
    options: SubscribeOptions,
) -> SubscriptionHandle {
    let (sink, events, cancel) = subscription_channel();
    let machine = match options.registration {
        Some(registration) => SubscriptionStateMachine::resume(options.mode, registration),
        None => SubscriptionStateMachine::new(options.mode),
    };
    let subscription = SubscriptionLoop {
        dispatcher,
        reconnect,
        event_types: options.event_types,
        apply_markdown: options.apply_markdown,
        machine,
        sink,
    };
    let task = tokio::spawn(subscription.run());

    SubscriptionHandle {
        events,
        cancel,
        task,
    }
}

struct SubscriptionLoop {
    dispatcher: RequestDispatcher,
    reconnect: ReconnectPolicy,
    event_types: Vec<String>,
    apply_markdown: bool,
    machine: SubscriptionStateMachine,
    sink: ItemSink,
}

impl SubscriptionLoop {
    async fn run(mut self) -> SubscriptionExit {
        info!(mode = ?self.machine.mode(), "event subscription started");
        match self.drive().await {
            Ok(exit) => {
                info!(?exit, "event subscription ended");
                exit
            }
            Err(err) => {
                error!(%err, "event subscription hit an invalid transition");
                SubscriptionExit::Closed
            }
        }
    }

    async fn drive(&mut self) -> Result<SubscriptionExit, InvalidTransition> {
        loop {
            if self.sink.is_cancelled() {
                return self.machine.on_cancelled();
            }
            if self.sink.is_closed() {
                return self.on_channel_error(ChannelError::ConsumerGone);
            }

            let transition = match self.machine.state().clone() {
                SubscriptionState::Polling {
                    queue_id,
                    last_event_id,
                } => match self.poll(&queue_id, last_event_id).await {
                    Ok(outcome) => self.machine.on_poll(outcome)?,
                    Err(err) => return self.on_channel_error(err),
                },
                SubscriptionState::Registering => match self.register().await {
                    Ok(Ok(registration)) => match self.machine.on_registered(registration)? {
                        None => continue,
                        Some(transition) => transition,
                    },
                    Ok(Err(err)) => self.machine.on_registration_failed(err)?,
                    Err(err) => return self.on_channel_error(err),
                },
                SubscriptionState::Reconnecting => {
                    let delay = self.reconnect.delay();
                    warn!(
                        delay_ms = delay.as_millis() as u64,
                        "event queue lost; re-registering after delay"
                    );

                    let waited = tokio::select! {
                        biased;
                        _ = self.sink.cancellation().cancelled() => Err(ChannelError::Cancelled),
                        _ = self.sink.closed() => Err(ChannelError::ConsumerGone),
                        _ = tokio::time::sleep(delay) => Ok(()),
                    };
                    if let Err(err) = waited {
                        return self.on_channel_error(err);
                    }

                    match self.register().await {
                        Ok(Ok(registration)) => match self.machine.on_registered(registration)? {
                            None => continue,
                            Some(transition) => transition,
                        },
                        Ok(Err(err)) => self.machine.on_registration_failed(err)?,
                        Err(err) => return self.on_channel_error(err),
                    }
                }
                terminal => {
                    return Err(InvalidTransition {
                        state: terminal.name(),
                        action: "continue polling",
                    });
                }
            };

            match transition {
                Transition::Deliver(events) => {
                    debug!(
                        count = events.len(),
                        cursor = ?self.machine.cursor().map(|(_, id)| id),
                        "poll batch received"
                    );
                    for event in events {
                        if let Err(err) = self.sink.forward(SubscriptionItem::Event(event)).await {
                            return self.on_channel_error(err);
                        }
                    }
                }
                Transition::Reconnect => {}
                Transition::Stop { item, exit } => {
                    if let Some(item) = item
                        && let Err(ChannelError::Cancelled) = self.sink.forward(item).await
                    {
                        return Ok(SubscriptionExit::Killed);
                    }
                    return Ok(exit);
                }
            }
        }
    }

    /// One events poll, interrupted by cancellation or a departed consumer.
    async fn poll(&self, queue_id: &str, last_event_id: i64) -> Result<PollOutcome, ChannelError> {
        let pending = self.dispatcher.request(
            Verb::Get,
            EVENTS_ENDPOINT,
            events_args(queue_id, last_event_id, false),
        );

        tokio::select! {
            biased;
            _ = self.sink.cancellation().cancelled() => Err(ChannelError::Cancelled),
            _ = self.sink.closed() => Err(ChannelError::ConsumerGone),
            outcome = pending => Ok(match outcome {
                None => PollOutcome::Closed,
                Some(Ok(body)) => match decode_events(EVENTS_ENDPOINT, &body) {
                    Ok(batch) => PollOutcome::Batch(batch),
                    Err(err) => PollOutcome::Failed(err),
                },
                Some(Err(err)) => PollOutcome::Failed(err),
            }),
        }
    }

    /// One queue registration, interrupted like [`Self::poll`].
    async fn register(&self) -> Result<Result<EventQueueRegistration, ApiError>, ChannelError> {
        let pending = self.dispatcher.request(
            Verb::Post,
            REGISTER_ENDPOINT,
            register_args(&self.event_types, self.apply_markdown),
        );

        let outcome = tokio::select! {
            biased;
            _ = self.sink.cancellation().cancelled() => return Err(ChannelError::Cancelled),
            _ = self.sink.closed() => return Err(ChannelError::ConsumerGone),
            outcome = pending => outcome,
        };

        let registered = match outcome {
            Some(Ok(body)) => EventQueueRegistration::from_response(REGISTER_ENDPOINT, &body),
            Some(Err(err)) => Err(err),
            None => Err(ApiError::new(
                ApiErrorKind::Generic,
                REGISTER_ENDPOINT,
                "registration ended without an outcome",
            )),
        };
        if let Ok(registration) = &registered {
            info!(
                queue_id = %registration.queue_id,
                last_event_id = registration.last_event_id,
                "event queue registered"
            );
        }
        Ok(registered)
    }

    fn on_channel_error(
        &mut self,
        err: ChannelError,
    ) -> Result<SubscriptionExit, InvalidTransition> {
        match err {
            ChannelError::Cancelled => self.machine.on_cancelled(),
            ChannelError::ConsumerGone => {
                debug!("subscription consumer dropped its receiver");
                self.machine.on_consumer_gone()
            }
        }
    }
}
