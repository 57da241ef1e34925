//! Transport-agnostic contract for the chat-service client.
//!
//! This crate defines the error taxonomy and classifier, wire types, the
//! event-subscription state machine and the single-slot subscription channel.

/// Single-slot subscription output channel.
pub mod channel;
/// Error taxonomy, HTTP/transport classification and the retry predicate.
pub mod error;
/// Poll batch normalization (heartbeat filtering, cursor advance).
pub mod normalization;
/// Delay policy between queue re-registrations.
pub mod retry;
/// Event-subscription state machine.
pub mod state_machine;
/// Request, response and event types.
pub mod types;

pub use channel::{ChannelError, ItemSink, ItemStream, subscription_channel};
pub use error::{ApiError, ApiErrorKind, RawFailure, classify, classify_http_status, retryable};
pub use normalization::{NormalizedBatch, normalize_event_batch};
pub use retry::ReconnectPolicy;
pub use state_machine::{
    InvalidTransition, PollOutcome, SubscriptionState, SubscriptionStateMachine, Transition,
};
pub use types::{
    ArgEncoding, Event, EventQueueRegistration, HEARTBEAT_EVENT_TYPE, Outcome, RequestArgs,
    ResponseBody, SubscriptionExit, SubscriptionItem, SubscriptionMode, Verb, decode_events,
};
