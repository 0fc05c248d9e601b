//! Broker session traits and types.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QueueError;

/// A raw delivery received from the job queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Broker delivery tag, used to ack or reject this message.
    pub delivery_tag: u64,
    /// Raw message body (JSON bytes).
    pub body: Vec<u8>,
    /// Whether the broker has delivered this message before.
    pub redelivered: bool,
    /// When this worker received the message.
    pub received_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn new(delivery_tag: u64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            delivery_tag,
            body: body.into(),
            redelivered: false,
            received_at: Utc::now(),
        }
    }
}

impl fmt::Display for QueueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueueMessage {{ tag: {}, bytes: {}, redelivered: {} }}",
            self.delivery_tag,
            self.body.len(),
            self.redelivered
        )
    }
}

/// Opens broker sessions.
///
/// Every call produces an independent session, so any number of workers can
/// consume the same queue, each with its own connection.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    /// Connect, declare the durable queue, set prefetch to 1 and start
    /// consuming with manual acknowledgment.
    async fn connect(&self) -> Result<Box<dyn QueueSession>, QueueError>;

    /// Queue name, for logging.
    fn queue_name(&self) -> &str;
}

/// A live consuming session. Any error returned here is broker-level.
#[async_trait]
pub trait QueueSession: Send {
    /// Wait for the next delivery.
    ///
    /// `Ok(None)` means the broker ended the consumer; treat it as a lost
    /// connection. Must be cancel-safe.
    async fn next_message(&mut self) -> Result<Option<QueueMessage>, QueueError>;

    /// Acknowledge: the job is permanently removed from the queue.
    async fn ack(&mut self, delivery_tag: u64) -> Result<(), QueueError>;

    /// Reject without requeue: the job is dropped (or dead-lettered by the broker).
    async fn reject(&mut self, delivery_tag: u64) -> Result<(), QueueError>;

    /// Close the session cleanly. Errors are not interesting at this point.
    async fn close(&mut self) {}
}
