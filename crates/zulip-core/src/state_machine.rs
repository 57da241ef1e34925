use thiserror::Error;

use crate::{
    error::{ApiError, ApiErrorKind},
    normalization::normalize_event_batch,
    types::{Event, EventQueueRegistration, SubscriptionExit, SubscriptionItem, SubscriptionMode},
};

/// Where a subscription loop currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    /// No queue yet; the first registration is in flight.
    Registering,
    /// Long-polling an event queue.
    Polling { queue_id: String, last_event_id: i64 },
    /// Waiting to register a replacement queue.
    Reconnecting,
    /// Cancelled, or reconnection gave up.
    Killed,
    /// The poll stream or consumer went away.
    Closed,
    /// The queue expired server-side.
    TimedOut,
    /// A failure was surfaced to the consumer.
    Failed,
}

impl SubscriptionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Killed | Self::Closed | Self::TimedOut | Self::Failed
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Registering => "Registering",
            Self::Polling { .. } => "Polling",
            Self::Reconnecting => "Reconnecting",
            Self::Killed => "Killed",
            Self::Closed => "Closed",
            Self::TimedOut => "TimedOut",
            Self::Failed => "Failed",
        }
    }
}

/// Outcome of one events poll as seen by the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Events in server order, heartbeats included.
    Batch(Vec<Event>),
    /// Typed request failure.
    Failed(ApiError),
    /// The request ended without an outcome.
    Closed,
}

/// What the loop must do after a state change.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Hand these events to the consumer, then poll again.
    Deliver(Vec<Event>),
    /// Wait out the reconnect delay and register a fresh queue.
    Reconnect,
    /// Deliver `item` (if any) and exit.
    Stop {
        item: Option<SubscriptionItem>,
        exit: SubscriptionExit,
    },
}

/// Rejected transition request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} while subscription is {state}")]
pub struct InvalidTransition {
    pub state: &'static str,
    pub action: &'static str,
}

const REGISTER_ENDPOINT: &str = "register";

/// Pure transition logic for one subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionStateMachine {
    mode: SubscriptionMode,
    state: SubscriptionState,
    /// Queue abandoned by the most recent reconnect.
    replaced_queue_id: Option<String>,
}

impl SubscriptionStateMachine {
    /// Start registering a queue before the first poll.
    pub fn new(mode: SubscriptionMode) -> Self {
        Self {
            mode,
            state: SubscriptionState::Registering,
            replaced_queue_id: None,
        }
    }

    /// Start polling a queue the caller already registered.
    pub fn resume(mode: SubscriptionMode, registration: EventQueueRegistration) -> Self {
        Self {
            mode,
            state: SubscriptionState::Polling {
                queue_id: registration.queue_id,
                last_event_id: registration.last_event_id,
            },
            replaced_queue_id: None,
        }
    }

    pub fn mode(&self) -> SubscriptionMode {
        self.mode
    }

    pub fn state(&self) -> &SubscriptionState {
        &self.state
    }

    /// Queue id and cursor for the next poll.
    pub fn cursor(&self) -> Option<(&str, i64)> {
        match &self.state {
            SubscriptionState::Polling {
                queue_id,
                last_event_id,
            } => Some((queue_id.as_str(), *last_event_id)),
            _ => None,
        }
    }

    pub fn on_cancelled(&mut self) -> Result<SubscriptionExit, InvalidTransition> {
        self.ensure_live("cancel")?;
        self.state = SubscriptionState::Killed;
        Ok(SubscriptionExit::Killed)
    }

    /// The consumer dropped its receiver.
    pub fn on_consumer_gone(&mut self) -> Result<SubscriptionExit, InvalidTransition> {
        self.ensure_live("drop consumer")?;
        self.state = SubscriptionState::Closed;
        Ok(SubscriptionExit::Closed)
    }

    pub fn on_poll(&mut self, outcome: PollOutcome) -> Result<Transition, InvalidTransition> {
        let SubscriptionState::Polling { last_event_id, .. } = &mut self.state else {
            return Err(self.invalid("apply poll outcome"));
        };

        match outcome {
            PollOutcome::Batch(batch) => {
                let normalized = normalize_event_batch(batch, *last_event_id);
                *last_event_id = normalized.last_event_id;
                Ok(Transition::Deliver(normalized.events))
            }
            PollOutcome::Closed => {
                self.state = SubscriptionState::Closed;
                Ok(Transition::Stop {
                    item: Some(SubscriptionItem::Closed),
                    exit: SubscriptionExit::Closed,
                })
            }
            PollOutcome::Failed(err) if err.kind == ApiErrorKind::Timeout => {
                self.state = SubscriptionState::TimedOut;
                Ok(Transition::Stop {
                    item: Some(SubscriptionItem::TimedOut),
                    exit: SubscriptionExit::TimedOut,
                })
            }
            PollOutcome::Failed(err)
                if err.is_retryable() && self.mode == SubscriptionMode::Durable =>
            {
                let previous = std::mem::replace(&mut self.state, SubscriptionState::Reconnecting);
                if let SubscriptionState::Polling { queue_id, .. } = previous {
                    self.replaced_queue_id = Some(queue_id);
                }
                Ok(Transition::Reconnect)
            }
            PollOutcome::Failed(err) => Ok(self.fail(err)),
        }
    }

    /// Start polling a freshly registered queue.
    ///
    /// A registration that hands back the queue id just replaced is treated as
    /// a failed registration; the returned transition says what to do next.
    /// `None` means the machine is now polling.
    pub fn on_registered(
        &mut self,
        registration: EventQueueRegistration,
    ) -> Result<Option<Transition>, InvalidTransition> {
        if !matches!(
            self.state,
            SubscriptionState::Registering | SubscriptionState::Reconnecting
        ) {
            return Err(self.invalid("accept registration"));
        }
        if self.replaced_queue_id.as_deref() == Some(registration.queue_id.as_str()) {
            let err = ApiError::new(
                ApiErrorKind::Generic,
                REGISTER_ENDPOINT,
                format!("server reissued replaced queue {}", registration.queue_id),
            );
            return self.on_registration_failed(err).map(Some);
        }
        self.state = SubscriptionState::Polling {
            queue_id: registration.queue_id,
            last_event_id: registration.last_event_id,
        };
        Ok(None)
    }

    pub fn on_registration_failed(
        &mut self,
        err: ApiError,
    ) -> Result<Transition, InvalidTransition> {
        match self.state {
            SubscriptionState::Registering => {
                if err.is_retryable() && self.mode == SubscriptionMode::Durable {
                    self.state = SubscriptionState::Reconnecting;
                    Ok(Transition::Reconnect)
                } else {
                    Ok(self.fail(err))
                }
            }
            SubscriptionState::Reconnecting => {
                if err.is_retryable() {
                    Ok(Transition::Reconnect)
                } else {
                    self.state = SubscriptionState::Killed;
                    Ok(Transition::Stop {
                        item: Some(SubscriptionItem::Error(err)),
                        exit: SubscriptionExit::Killed,
                    })
                }
            }
            _ => Err(self.invalid("apply registration failure")),
        }
    }

    fn fail(&mut self, err: ApiError) -> Transition {
        self.state = SubscriptionState::Failed;
        Transition::Stop {
            item: Some(SubscriptionItem::Error(err.clone())),
            exit: SubscriptionExit::Failed(err),
        }
    }

    fn ensure_live(&self, action: &'static str) -> Result<(), InvalidTransition> {
        if self.state.is_terminal() {
            return Err(self.invalid(action));
        }
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> InvalidTransition {
        InvalidTransition {
            state: self.state.name(),
            action,
        }
    }
}
