//! Reconnect delay policy.

use std::time::Duration;

/// How long to wait before reconnect attempt number `attempt` (1-based).
///
/// `attempt` resets to 1 after every successful connection.
pub trait ReconnectPolicy: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// The same delay every time, forever. No growth, no retry limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl ReconnectPolicy for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}
