pub mod amqp;
pub mod consumer;
pub mod error;
pub mod parser;

pub use amqp::AmqpConnector;
pub use consumer::{QueueConnector, QueueMessage, QueueSession};
pub use error::QueueError;
pub use parser::parse_job;
