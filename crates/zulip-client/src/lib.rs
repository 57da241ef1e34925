//! HTTP client for the chat service.
//!
//! Requests run on their own tokio tasks through a [`Transport`]; every
//! failure comes back as a typed [`zulip_core::ApiError`] value. The
//! subscription loop builds on that to keep a durable event stream open.

/// REST wrappers and the client entry point.
pub mod api;
/// Credentials, base URL and tunables.
pub mod connection;
/// Per-request task spawning.
pub mod dispatcher;
/// Request diagnostics hook.
pub mod observer;
/// Long-polling event subscription loop.
pub mod subscription;
/// Single HTTP call execution and failure classification.
pub mod transport;

#[cfg(test)]
mod testing;

pub use api::ZulipClient;
pub use connection::{ClientOptions, Connection, DEFAULT_REQUEST_TIMEOUT};
pub use dispatcher::{PendingRequest, RequestDispatcher};
pub use observer::{NoopObserver, RequestObserver, RequestRecord, TracingObserver};
pub use subscription::{SubscribeOptions, SubscriptionHandle};
pub use transport::{ClientError, HttpTransport, Transport};
