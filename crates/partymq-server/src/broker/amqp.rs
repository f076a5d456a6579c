//! RabbitMQ adapter
//!
//! Uses three connections: one for topology declarations, one for publishing
//! to partitions and one for consuming the source queue. A slow consumer can
//! then never block publishes behind it on the same socket.

use super::{Broker, BrokerError, Delivery, HeaderValue, Headers, OutboundMessage, Publisher, Subscription};
use futures::StreamExt;
use lapin::message::Delivery as LapinDelivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, BasicRejectOptions, ExchangeDeclareOptions,
};
use lapin::types::{AMQPValue, ByteArray, FieldArray, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use std::sync::Arc;
use tracing::{debug, info};

pub struct AmqpBroker {
    primary: Connection,
    publish: Connection,
    subscribe: Connection,
    publish_channel: Channel,
}

impl AmqpBroker {
    /// Open the broker connections.
    pub async fn connect(uri: &str) -> Result<Self, BrokerError> {
        let primary = Connection::connect(uri, ConnectionProperties::default()).await?;
        let publish = Connection::connect(uri, ConnectionProperties::default()).await?;
        let subscribe = Connection::connect(uri, ConnectionProperties::default()).await?;
        let publish_channel = publish.create_channel().await?;

        info!("Connected to broker");
        Ok(Self {
            primary,
            publish,
            subscribe,
            publish_channel,
        })
    }

    /// Declare the auto-delete direct exchange partition queues bind to.
    pub async fn declare_exchange(&self, exchange: &str) -> Result<(), BrokerError> {
        let channel = self.primary.create_channel().await?;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    auto_delete: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel.close(200, "declared").await?;

        debug!(exchange = %exchange, "Exchange declared");
        Ok(())
    }

    /// Invoke `handler` when any of the broker connections fails.
    pub fn on_connection_lost<F>(&self, handler: F)
    where
        F: Fn(BrokerError) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        for connection in [&self.primary, &self.publish, &self.subscribe] {
            let handler = Arc::clone(&handler);
            connection.on_error(move |error| handler(BrokerError::Amqp(error)));
        }
    }

    /// Close all connections.
    pub async fn close(&self) -> Result<(), BrokerError> {
        for connection in [&self.subscribe, &self.publish, &self.primary] {
            connection.close(200, "shutting down").await?;
        }
        Ok(())
    }
}

impl Publisher for AmqpBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        let properties = BasicProperties::default()
            .with_headers(to_field_table(&message.headers))
            .with_timestamp(message.timestamp)
            .with_app_id(ShortString::from(message.app_id));

        self.publish_channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }
}

impl Broker for AmqpBroker {
    type Subscription = AmqpSubscription;

    async fn subscribe(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> Result<AmqpSubscription, BrokerError> {
        let channel = self.subscribe.create_channel().await?;
        let consumer = match consume(&channel, queue, consumer_tag, prefetch).await {
            Ok(consumer) => consumer,
            Err(err) => {
                if let Err(close_err) = channel.close(200, "subscribe failed").await {
                    debug!(error = %close_err, "Failed to close subscribe channel");
                }
                return Err(err);
            }
        };

        Ok(AmqpSubscription {
            channel,
            consumer,
            consumer_tag: consumer_tag.to_string(),
        })
    }
}

async fn consume(
    channel: &Channel,
    queue: &str,
    consumer_tag: &str,
    prefetch: u16,
) -> Result<Consumer, BrokerError> {
    channel
        .basic_qos(prefetch, BasicQosOptions::default())
        .await?;
    let consumer = channel
        .basic_consume(
            queue,
            consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;
    Ok(consumer)
}

pub struct AmqpSubscription {
    channel: Channel,
    consumer: Consumer,
    consumer_tag: String,
}

impl Subscription for AmqpSubscription {
    type Delivery = AmqpDelivery;

    async fn next_delivery(&mut self) -> Option<Result<AmqpDelivery, BrokerError>> {
        let delivery = self.consumer.next().await?;
        Some(delivery.map(AmqpDelivery::new).map_err(BrokerError::from))
    }

    async fn cancel(self) -> Result<(), BrokerError> {
        self.channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await?;
        self.channel.close(200, "consumer cancelled").await?;
        Ok(())
    }
}

pub struct AmqpDelivery {
    inner: LapinDelivery,
    headers: Headers,
}

impl AmqpDelivery {
    fn new(inner: LapinDelivery) -> Self {
        let headers = inner
            .properties
            .headers()
            .as_ref()
            .map(from_field_table)
            .unwrap_or_default();
        Self { inner, headers }
    }
}

impl Delivery for AmqpDelivery {
    fn body(&self) -> &[u8] {
        &self.inner.data
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    async fn ack(self) -> Result<(), BrokerError> {
        self.inner.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack_requeue(self) -> Result<(), BrokerError> {
        self.inner
            .acker
            .nack(BasicNackOptions {
                requeue: true,
                ..BasicNackOptions::default()
            })
            .await?;
        Ok(())
    }

    async fn reject_requeue(self) -> Result<(), BrokerError> {
        self.inner
            .acker
            .reject(BasicRejectOptions { requeue: true })
            .await?;
        Ok(())
    }
}

fn from_field_table(table: &FieldTable) -> Headers {
    table
        .inner()
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), from_amqp_value(value)))
        .collect()
}

fn to_field_table(headers: &Headers) -> FieldTable {
    let mut table = FieldTable::default();
    for (name, value) in headers {
        table.insert(ShortString::from(name.clone()), to_amqp_value(value));
    }
    table
}

fn from_amqp_value(value: &AMQPValue) -> HeaderValue {
    match value {
        AMQPValue::Boolean(v) => HeaderValue::Bool(*v),
        AMQPValue::ShortShortInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongLongInt(v) => HeaderValue::Int(*v),
        AMQPValue::Float(v) => HeaderValue::Float(f64::from(*v)),
        AMQPValue::Double(v) => HeaderValue::Float(*v),
        AMQPValue::DecimalValue(d) => {
            HeaderValue::Float(f64::from(d.value) / 10f64.powi(i32::from(d.scale)))
        }
        AMQPValue::ShortString(s) => HeaderValue::String(s.as_str().to_string()),
        AMQPValue::LongString(s) => {
            HeaderValue::String(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }
        AMQPValue::FieldArray(a) => {
            HeaderValue::Array(a.as_slice().iter().map(from_amqp_value).collect())
        }
        AMQPValue::Timestamp(t) => HeaderValue::Timestamp(*t),
        AMQPValue::FieldTable(t) => HeaderValue::Table(from_field_table(t)),
        AMQPValue::ByteArray(b) => HeaderValue::Bytes(b.as_slice().to_vec()),
        AMQPValue::Void => HeaderValue::Void,
    }
}

fn to_amqp_value(value: &HeaderValue) -> AMQPValue {
    match value {
        HeaderValue::Bool(v) => AMQPValue::Boolean(*v),
        HeaderValue::Int(v) => AMQPValue::LongLongInt(*v),
        HeaderValue::Float(v) => AMQPValue::Double(*v),
        HeaderValue::String(s) => AMQPValue::LongString(LongString::from(s.clone())),
        HeaderValue::Bytes(b) => AMQPValue::ByteArray(ByteArray::from(b.clone())),
        HeaderValue::Timestamp(t) => AMQPValue::Timestamp(*t),
        HeaderValue::Array(items) => AMQPValue::FieldArray(FieldArray::from(
            items.iter().map(to_amqp_value).collect::<Vec<_>>(),
        )),
        HeaderValue::Table(table) => AMQPValue::FieldTable(to_field_table(table)),
        HeaderValue::Void => AMQPValue::Void,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::DecimalValue;

    #[test]
    fn test_header_conversion_preserves_values() {
        let mut nested = Headers::new();
        nested.insert("depth".to_string(), HeaderValue::Int(2));

        let mut headers = Headers::new();
        headers.insert("partitionKey".to_string(), HeaderValue::from("k1"));
        headers.insert("retries".to_string(), HeaderValue::Int(3));
        headers.insert("urgent".to_string(), HeaderValue::Bool(true));
        headers.insert("sent".to_string(), HeaderValue::Timestamp(1_700_000_000));
        headers.insert(
            "tags".to_string(),
            HeaderValue::Array(vec![HeaderValue::from("a"), HeaderValue::from("b")]),
        );
        headers.insert("meta".to_string(), HeaderValue::Table(nested));

        assert_eq!(from_field_table(&to_field_table(&headers)), headers);
    }

    #[test]
    fn test_narrow_amqp_types_widen() {
        assert_eq!(from_amqp_value(&AMQPValue::ShortInt(-4)), HeaderValue::Int(-4));
        assert_eq!(from_amqp_value(&AMQPValue::LongUInt(9)), HeaderValue::Int(9));
        assert_eq!(
            from_amqp_value(&AMQPValue::ShortString(ShortString::from("k2"))),
            HeaderValue::from("k2")
        );
        assert_eq!(
            from_amqp_value(&AMQPValue::DecimalValue(DecimalValue { scale: 2, value: 150 })),
            HeaderValue::Float(1.5)
        );
    }
}
