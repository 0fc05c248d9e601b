//! Queue-driven device backup worker.
//!
//! Wires the broker session, the device backup executor and the status
//! reporter into a single sequential [`QueueConsumer`].

pub mod consumer;
pub mod policy;
pub mod shutdown;
pub mod telemetry;

pub use consumer::{ConsumerBuilder, ConsumerState, ConsumerStats, Disposition, QueueConsumer, StatsSnapshot};
pub use policy::{FixedDelay, ReconnectPolicy};
