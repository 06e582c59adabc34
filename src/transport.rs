// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Transport Collaborator
//!
//! The gateways never talk to lapin directly. They go through the `Transport` trait,
//! which exposes exactly the broker primitives this crate relies on: declare, bind,
//! publish, consume with manual acknowledgment, ack and nack.
//!
//! `crate::amqp::LapinTransport` is the production implementation.

use crate::{errors::AmqpError, exchange::ExchangeKind};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::BTreeMap;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A header value attached to a published message or read from a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Int(i32),
    LongLongInt(i64),
    LongString(String),
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::LongString(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::LongString(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl From<i32> for HeaderValue {
    fn from(value: i32) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::LongLongInt(value)
    }
}

/// Message headers keyed by name.
pub type Headers = BTreeMap<String, HeaderValue>;

/// Message level metadata sent alongside the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: String,
    pub message_type: String,
    pub message_id: String,
    pub persistent: bool,
    pub mandatory: bool,
    pub headers: Headers,
}

/// A message handed over by the broker.
///
/// The delivery belongs to the transport until it is acked or nacked through
/// `Transport::ack`/`Transport::nack` with its `delivery_tag`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    /// Broker side delivery count, when the queue type reports one.
    pub delivery_count: Option<u32>,
    pub headers: Headers,
    pub data: Vec<u8>,
}

/// Continuous stream of deliveries for one consumer.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// Broker primitives consumed by the topology manager and the gateways.
///
/// Implementations sharing a channel must serialise declare and publish calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Declares an exchange. Idempotent when the parameters match an existing one.
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError>;

    /// Declares a queue. Idempotent when the flags and arguments match an existing one.
    async fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
        arguments: &Headers,
    ) -> Result<(), AmqpError>;

    /// Binds a queue to an exchange with a routing key.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    /// Publishes a message body.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Result<(), AmqpError>;

    /// Limits the number of unacknowledged deliveries on the channel.
    async fn qos(&self, prefetch_count: u16) -> Result<(), AmqpError>;

    /// Registers a manual-ack consumer on `queue`.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AmqpError>;

    /// Releases a consumer registration. The channel stays open.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    /// Acknowledges a delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    /// Negatively acknowledges a delivery, returning it to the queue when `requeue`.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;
}
