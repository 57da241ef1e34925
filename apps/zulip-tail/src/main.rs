mod config;
mod logging;

use std::sync::Arc;

use tracing::{error, info, warn};
use zulip_client::{SubscribeOptions, TracingObserver, ZulipClient};
use zulip_core::{SubscriptionExit, SubscriptionItem};

use crate::config::TailConfig;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match TailConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            eprintln!("Required: ZULIP_EMAIL, ZULIP_API_KEY and ZULIP_SITE");
            std::process::exit(1);
        }
    };

    let client = match ZulipClient::with_observer(
        config.connection(),
        config.client_options(),
        Arc::new(TracingObserver),
    ) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Failed to initialize client: {err}");
            std::process::exit(1);
        }
    };

    info!(
        site = %config.api_url,
        mode = ?config.mode,
        event_types = ?config.event_types,
        "starting event tail"
    );

    let mut handle = client.subscribe_events(SubscribeOptions {
        event_types: config.event_types.clone(),
        apply_markdown: config.apply_markdown,
        mode: config.mode,
        registration: None,
    });

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for ctrl-c; stopping");
                }
                info!("interrupt received; cancelling subscription");
                handle.cancel();
                break;
            }
            item = handle.next() => match item {
                Some(SubscriptionItem::Event(event)) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!(event_id = event.id, error = %err, "failed to encode event"),
                },
                Some(SubscriptionItem::Error(err)) => {
                    error!(
                        kind = err.kind.code(),
                        endpoint = %err.endpoint,
                        "subscription error: {}",
                        err.message
                    );
                }
                Some(SubscriptionItem::Closed) => {
                    info!("server closed the event stream");
                }
                Some(SubscriptionItem::TimedOut) => {
                    warn!("event stream timed out");
                }
                None => break,
            },
        }
    }

    match handle.finish().await {
        SubscriptionExit::Failed(err) => {
            error!(error = %err, "subscription failed");
            std::process::exit(1);
        }
        exit => info!(exit = ?exit, "subscription finished"),
    }
}
