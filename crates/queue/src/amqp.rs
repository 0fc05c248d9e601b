//! RabbitMQ (AMQP 0-9-1) job queue implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::AMQPUri;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, info};
use uuid::Uuid;

use netbackup_core::config::BrokerConfig;

use crate::consumer::{QueueConnector, QueueMessage, QueueSession};
use crate::error::QueueError;

/// In-flight jobs per consumer. One job at a time keeps processing strictly ordered.
pub const PREFETCH_COUNT: u16 = 1;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connects to RabbitMQ and consumes a durable queue.
pub struct AmqpConnector {
    uri: AMQPUri,
    queue: String,
    endpoint: String,
}

impl AmqpConnector {
    /// Create a connector from project config. Does not connect yet.
    pub fn new(config: &BrokerConfig) -> Self {
        let mut uri = AMQPUri::default();
        uri.authority.host = config.host.clone();
        uri.authority.port = config.port;
        uri.authority.userinfo.username = config.username.clone();
        uri.authority.userinfo.password = config.password.clone();
        uri.vhost = config.vhost.clone();
        uri.query.heartbeat = Some(config.heartbeat_secs);

        info!(
            host = %config.host,
            port = config.port,
            queue = %config.queue,
            "AMQP connector initialized"
        );

        Self {
            uri,
            queue: config.queue.clone(),
            endpoint: format!("{}:{}", config.host, config.port),
        }
    }

    async fn open(&self) -> Result<AmqpSession, QueueError> {
        let properties = ConnectionProperties::default()
            .with_connection_name("netbackup-worker".into());

        let connection = Connection::connect_uri(self.uri.clone(), properties)
            .await
            .map_err(|e| QueueError::Connection(format!("{}: {e}", self.endpoint)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(format!("channel open failed: {e}")))?;

        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Declare(format!("{}: {e}", self.queue)))?;

        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::Connection(format!("basic.qos failed: {e}")))?;

        let consumer_tag = format!("netbackup-{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &self.queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connection(format!("basic.consume failed: {e}")))?;

        info!(
            endpoint = %self.endpoint,
            queue = %self.queue,
            consumer_tag = %consumer_tag,
            prefetch = PREFETCH_COUNT,
            "Connected to RabbitMQ"
        );

        Ok(AmqpSession {
            connection,
            channel,
            consumer,
        })
    }
}

#[async_trait]
impl QueueConnector for AmqpConnector {
    async fn connect(&self) -> Result<Box<dyn QueueSession>, QueueError> {
        let session = tokio::time::timeout(CONNECT_TIMEOUT, self.open())
            .await
            .map_err(|_| QueueError::Timeout(CONNECT_TIMEOUT.as_millis() as u64))??;
        Ok(Box::new(session))
    }

    fn queue_name(&self) -> &str {
        &self.queue
    }
}

/// One connection, one channel, one consumer.
pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl QueueSession for AmqpSession {
    async fn next_message(&mut self) -> Result<Option<QueueMessage>, QueueError> {
        match self.consumer.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(QueueError::Connection(format!("delivery failed: {e}"))),
            Some(Ok(delivery)) => {
                debug!(delivery_tag = delivery.delivery_tag, "Received delivery");
                Ok(Some(QueueMessage {
                    delivery_tag: delivery.delivery_tag,
                    body: delivery.data,
                    redelivered: delivery.redelivered,
                    received_at: Utc::now(),
                }))
            }
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), QueueError> {
        debug!(delivery_tag, "Acking delivery");
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }

    async fn reject(&mut self, delivery_tag: u64) -> Result<(), QueueError> {
        debug!(delivery_tag, "Rejecting delivery (requeue=false)");
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue: false })
            .await
            .map_err(|e| QueueError::Reject(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close(200, "worker shutting down").await {
            debug!(error = %e, "channel close failed");
        }
        if let Err(e) = self.connection.close(200, "worker shutting down").await {
            debug!(error = %e, "connection close failed");
        }
    }
}
