//! RabbitMQ binding.

use crate::config::{AckMode, WorkerConfig};
use crate::consumer::{InboundMessage, MessageSource};
use crate::error::BrokerError;
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use tracing::info;

/// At most one unacknowledged delivery in flight for this worker.
pub const PREFETCH_COUNT: u16 = 1;
pub const CONSUMER_TAG: &str = "kiln-worker";

/// In auto mode the broker does not wait for an ack.
#[must_use]
pub fn consume_options(ack_mode: AckMode) -> BasicConsumeOptions {
    BasicConsumeOptions { no_ack: ack_mode == AckMode::Auto, ..BasicConsumeOptions::default() }
}

/// A single consumer on the configured queue.
///
/// In [`AckMode::Auto`] the broker treats a delivery as consumed as soon as
/// it is sent, so a crash mid-job drops that job without a reply.
pub struct AmqpSource {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

impl AmqpSource {
    pub async fn connect(config: &WorkerConfig) -> Result<Self, BrokerError> {
        let connection = Connection::connect(&config.amqp_uri(), ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel.basic_qos(PREFETCH_COUNT, BasicQosOptions::default()).await?;

        let consumer = channel
            .basic_consume(&config.queue, CONSUMER_TAG, consume_options(config.ack_mode), FieldTable::default())
            .await?;

        info!(
            host = %config.amqp_host,
            vhost = %config.vhost,
            queue = %config.queue,
            prefetch = PREFETCH_COUNT,
            "connected to broker"
        );
        Ok(Self { connection, channel, consumer })
    }

    /// Close the channel and connection.
    pub async fn close(self) -> Result<(), BrokerError> {
        self.channel.close(200, "worker shutdown").await?;
        self.connection.close(200, "worker shutdown").await?;
        Ok(())
    }
}

#[async_trait]
impl MessageSource for AmqpSource {
    async fn next_message(&mut self) -> Option<Result<InboundMessage, BrokerError>> {
        let delivery = self.consumer.next().await?;
        Some(
            delivery
                .map(|d| InboundMessage { delivery_tag: d.delivery_tag, payload: d.data })
                .map_err(BrokerError::from),
        )
    }

    async fn ack(&mut self, message: &InboundMessage) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(message.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Ack { tag: message.delivery_tag, reason: e.to_string() })
    }
}
