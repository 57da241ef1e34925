use std::time::Duration;

/// Delay between event-queue re-registration attempts.
///
/// Every attempt waits the same interval and there is no attempt cap; giving
/// up is left to the caller's cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delay: Duration,
}

impl ReconnectPolicy {
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Self::DEFAULT_DELAY)
    }
}
