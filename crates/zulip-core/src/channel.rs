use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::SubscriptionItem;

/// Receiving side of a subscription's output.
pub type ItemStream = mpsc::Receiver<SubscriptionItem>;

/// Errors returned by subscription channel operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The consumer dropped its receiver.
    #[error("subscription consumer is gone")]
    ConsumerGone,
    /// Cancellation was signalled while waiting on the consumer.
    #[error("subscription was cancelled")]
    Cancelled,
}

/// Producer side owned by the subscription loop.
#[derive(Debug)]
pub struct ItemSink {
    tx: mpsc::Sender<SubscriptionItem>,
    cancel: CancellationToken,
}

/// Create a single-slot output channel and its cancellation signal.
///
/// The sink blocks while the slot is occupied, so a slow consumer stalls the
/// loop instead of growing a buffer.
pub fn subscription_channel() -> (ItemSink, ItemStream, CancellationToken) {
    let (tx, rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    (
        ItemSink {
            tx,
            cancel: cancel.clone(),
        },
        rx,
        cancel,
    )
}

impl ItemSink {
    /// Hand one item to the consumer, giving up if cancellation wins.
    pub async fn forward(&self, item: SubscriptionItem) -> Result<(), ChannelError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ChannelError::Cancelled),
            sent = self.tx.send(item) => sent.map_err(|_| ChannelError::ConsumerGone),
        }
    }

    /// Resolves once the consumer has dropped its receiver.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
