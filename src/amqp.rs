// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Lapin Transport
//!
//! `LapinTransport` implements the `Transport` trait on top of a shared lapin channel.
//! Declare and publish calls go through one lock per transport instance; consumers get
//! a stream of deliveries converted into the crate's transport-neutral `Delivery`.

use crate::{
    errors::AmqpError,
    exchange::ExchangeKind,
    transport::{Delivery, DeliveryStream, HeaderValue, Headers, MessageProperties, Transport},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    protocol::{AMQPErrorKind, AMQPSoftError},
    types::{AMQPValue, FieldTable, LongInt, LongLongInt, LongString, ShortString},
    BasicProperties, Channel,
};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Header set by quorum queues with the number of delivery attempts
pub const AMQP_HEADERS_DELIVERY_COUNT: &str = "x-delivery-count";
/// Constant for the x-death header used in RabbitMQ's dead-lettering mechanism
pub const AMQP_HEADERS_X_DEATH: &str = "x-death";
/// Constant for the count field in the x-death header
pub const AMQP_HEADERS_COUNT: &str = "count";
/// AMQP delivery mode for persistent messages
const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// RabbitMQ implementation of the `Transport` trait.
pub struct LapinTransport {
    channel: Arc<Channel>,
    lock: Mutex<()>,
}

impl LapinTransport {
    /// Creates a new transport over an already opened channel.
    ///
    /// Declare and publish calls are serialised per transport, not per channel: share
    /// the returned transport instead of creating a second one over the same channel.
    ///
    /// # Parameters
    /// * `channel` - A channel to the RabbitMQ server, owned by the caller
    ///
    /// # Returns
    /// An Arc-wrapped LapinTransport instance for thread-safe sharing
    pub fn new(channel: Arc<Channel>) -> Arc<LapinTransport> {
        Arc::new(LapinTransport {
            channel,
            lock: Mutex::new(()),
        })
    }
}

#[async_trait]
impl Transport for LapinTransport {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", name);
        let _guard = self.lock.lock().await;

        match self
            .channel
            .exchange_declare(
                name,
                kind.into(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = name,
                    "error to declare the exchange"
                );
                Err(declare_error(&err, name, AmqpError::DeclareExchangeError))
            }
            _ => {
                debug!("exchange: {} was created", name);
                Ok(())
            }
        }
    }

    async fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
        arguments: &Headers,
    ) -> Result<(), AmqpError> {
        debug!("creating queue: {}", name);
        let _guard = self.lock.lock().await;

        match self
            .channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: false,
                    durable,
                    exclusive,
                    auto_delete,
                    nowait: false,
                },
                to_field_table(arguments),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = name, "error to declare the queue");
                Err(declare_error(&err, name, AmqpError::DeclareQueueError))
            }
            _ => {
                debug!("queue: {} was created", name);
                Ok(())
            }
        }
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, exchange, routing_key
        );
        let _guard = self.lock.lock().await;

        match self
            .channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Result<(), AmqpError> {
        let mut props = BasicProperties::default()
            .with_content_type(ShortString::from(properties.content_type))
            .with_type(ShortString::from(properties.message_type))
            .with_message_id(ShortString::from(properties.message_id))
            .with_headers(to_field_table(&properties.headers));

        if properties.persistent {
            props = props.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
        }

        let _guard = self.lock.lock().await;

        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: properties.mandatory,
                },
                &body,
                props,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError)
            }
            _ => Ok(()),
        }
    }

    async fn qos(&self, prefetch_count: u16) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_qos(prefetch_count, BasicQosOptions { global: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to configure qos");
                Err(AmqpError::QoSDeclarationError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AmqpError> {
        let consumer = match self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::ConsumerDeclarationError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        Ok(consumer
            .map(|result| match result {
                Ok(delivery) => Ok(into_delivery(delivery)),
                Err(err) => {
                    error!(error = err.to_string(), "errors consume msg");
                    Err(AmqpError::ConsumerError(err.to_string()))
                }
            })
            .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_cancel(consumer_tag, BasicCancelOptions { nowait: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), consumer_tag, "error to cancel the consumer");
                Err(AmqpError::CancelConsumerError(consumer_tag.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error whiling ack msg");
                Err(AmqpError::AckMessageError)
            }
            _ => Ok(()),
        }
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error whiling nack msg");
                Err(AmqpError::NackMessageError)
            }
            _ => Ok(()),
        }
    }
}

/// Maps a declare failure, telling parameter mismatches apart from other failures.
///
/// RabbitMQ answers a redeclaration with different parameters with a
/// `PRECONDITION_FAILED` channel error.
fn declare_error(err: &lapin::Error, name: &str, other: fn(String) -> AmqpError) -> AmqpError {
    match err {
        lapin::Error::ProtocolError(amqp_err)
            if matches!(
                amqp_err.kind(),
                AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED)
            ) =>
        {
            AmqpError::TopologyConflict(name.to_owned())
        }
        _ => other(name.to_owned()),
    }
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let table = delivery.properties.headers().clone().unwrap_or_default();

    Delivery {
        delivery_tag: delivery.delivery_tag,
        exchange: delivery.exchange.to_string(),
        routing_key: delivery.routing_key.to_string(),
        redelivered: delivery.redelivered,
        delivery_count: delivery_count(&table),
        headers: from_field_table(&table),
        data: delivery.data,
    }
}

/// Converts outgoing headers into an AMQP field table.
pub(crate) fn to_field_table(headers: &Headers) -> FieldTable {
    let mut btree = BTreeMap::<ShortString, AMQPValue>::default();

    for (key, value) in headers {
        let amqp_value = match value {
            HeaderValue::Bool(v) => AMQPValue::Boolean(*v),
            HeaderValue::Int(v) => AMQPValue::LongInt(LongInt::from(*v)),
            HeaderValue::LongLongInt(v) => AMQPValue::LongLongInt(LongLongInt::from(*v)),
            HeaderValue::LongString(v) => AMQPValue::LongString(LongString::from(v.clone())),
        };

        btree.insert(ShortString::from(key.clone()), amqp_value);
    }

    FieldTable::from(btree)
}

/// Keeps the scalar headers of a delivery. Arrays and nested tables are dropped.
pub(crate) fn from_field_table(table: &FieldTable) -> Headers {
    let mut headers = Headers::new();

    for (key, value) in table.inner() {
        let header = match value {
            AMQPValue::Boolean(v) => HeaderValue::Bool(*v),
            AMQPValue::ShortShortInt(v) => HeaderValue::Int(i32::from(*v)),
            AMQPValue::ShortShortUInt(v) => HeaderValue::Int(i32::from(*v)),
            AMQPValue::ShortInt(v) => HeaderValue::Int(i32::from(*v)),
            AMQPValue::ShortUInt(v) => HeaderValue::Int(i32::from(*v)),
            AMQPValue::LongInt(v) => HeaderValue::Int(*v),
            AMQPValue::LongUInt(v) => HeaderValue::LongLongInt(i64::from(*v)),
            AMQPValue::LongLongInt(v) => HeaderValue::LongLongInt(*v),
            AMQPValue::ShortString(v) => HeaderValue::LongString(v.to_string()),
            AMQPValue::LongString(v) => {
                HeaderValue::LongString(String::from_utf8_lossy(v.as_bytes()).into_owned())
            }
            _ => continue,
        };

        headers.insert(key.to_string(), header);
    }

    headers
}

/// Reads the broker delivery count from `x-delivery-count`, falling back to the
/// count of the first `x-death` entry.
pub(crate) fn delivery_count(table: &FieldTable) -> Option<u32> {
    let headers = table.inner();

    if let Some(value) = headers.get(AMQP_HEADERS_DELIVERY_COUNT) {
        let count = value
            .as_long_long_int()
            .or_else(|| value.as_long_int().map(i64::from));
        return count.and_then(|c| u32::try_from(c).ok());
    }

    headers
        .get(AMQP_HEADERS_X_DEATH)
        .and_then(|value| value.as_array())
        .and_then(|arr| arr.as_slice().first())
        .and_then(|value| value.as_field_table())
        .and_then(|table| table.inner().get(AMQP_HEADERS_COUNT))
        .and_then(|value| value.as_long_long_int())
        .and_then(|c| u32::try_from(c).ok())
}
