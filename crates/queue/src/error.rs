//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("message parse error: {0}")]
    Parse(String),

    #[error("acknowledge error: {0}")]
    Ack(String),

    #[error("reject error: {0}")]
    Reject(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("queue declare error: {0}")]
    Declare(String),

    #[error("consumer stream closed")]
    StreamClosed,
}

impl QueueError {
    /// Whether the broker session is unusable and must be re-established.
    ///
    /// Everything except a bad payload is broker-level.
    pub fn is_connection_level(&self) -> bool {
        !matches!(self, QueueError::Parse(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_parse_errors_are_job_level() {
        assert!(!QueueError::Parse("bad json".into()).is_connection_level());
        assert!(QueueError::Connection("reset".into()).is_connection_level());
        assert!(QueueError::Ack("channel closed".into()).is_connection_level());
        assert!(QueueError::StreamClosed.is_connection_level());
    }
}
