use crate::types::Event;

/// A poll batch reduced to what the consumer sees.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    /// Non-heartbeat events in arrival order.
    pub events: Vec<Event>,
    /// Cursor to use for the next poll.
    pub last_event_id: i64,
}

/// Drop heartbeats and advance the cursor to the largest id seen.
///
/// The cursor never moves backwards; an empty batch leaves it unchanged.
pub fn normalize_event_batch(batch: Vec<Event>, last_event_id: i64) -> NormalizedBatch {
    let cursor = batch
        .iter()
        .map(|event| event.id)
        .fold(last_event_id, i64::max);

    NormalizedBatch {
        events: batch.into_iter().filter(|event| !event.is_heartbeat()).collect(),
        last_event_id: cursor,
    }
}
