//! Tracing/logging bootstrap for `zulip-tail`.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,zulip_tail=debug,zulip_client=info";

/// Initialize the global tracing subscriber.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `ZULIP_TAIL_LOG`
/// 3) internal default filter
///
/// Logs go to stderr so stdout carries only events.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter_from_env())
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    if let Some(value) = env::var("ZULIP_TAIL_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(value)
    {
        return filter;
    }

    EnvFilter::new(DEFAULT_FILTER)
}
