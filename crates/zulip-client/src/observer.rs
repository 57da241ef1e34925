//! Diagnostics hook invoked once per transport call.

use std::time::SystemTime;

use tracing::{debug, warn};
use zulip_core::{Outcome, RequestArgs, Verb};

/// Everything known about one finished request.
#[derive(Debug, Clone)]
pub struct RequestRecord<'a> {
    pub timestamp: SystemTime,
    pub verb: Verb,
    pub endpoint: &'a str,
    pub args: &'a RequestArgs,
    pub outcome: &'a Outcome,
}

/// Receives a record for every transport call.
///
/// Implementations run inline on the request task and must return quickly;
/// they cannot fail the request.
pub trait RequestObserver: Send + Sync {
    fn observe(&self, record: &RequestRecord<'_>);
}

/// Emits one `tracing` event per request.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RequestObserver for TracingObserver {
    fn observe(&self, record: &RequestRecord<'_>) {
        // Argument values may carry message bodies; only keys are logged.
        let arg_keys: Vec<&str> = record.args.iter().map(|(key, _)| key).collect();
        match record.outcome {
            Ok(_) => debug!(
                verb = record.verb.as_str(),
                endpoint = record.endpoint,
                ?arg_keys,
                "request succeeded"
            ),
            Err(err) => warn!(
                verb = record.verb.as_str(),
                endpoint = record.endpoint,
                ?arg_keys,
                code = err.kind.code(),
                message = %err.message,
                "request failed"
            ),
        }
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RequestObserver for NoopObserver {
    fn observe(&self, _record: &RequestRecord<'_>) {}
}
