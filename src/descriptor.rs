// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Descriptor
//!
//! A `TopologyDescriptor` names the exchange, queue and binding a publish or subscribe
//! call relies on. Descriptors are built per call, never persisted, and validated
//! before any transport call is issued.

use crate::{
    errors::AmqpError,
    exchange::ExchangeKind,
    transport::{HeaderValue, Headers},
};

/// Queue argument selecting the queue type
pub const QUEUE_TYPE_ARGUMENT: &str = "x-queue-type";
/// Queue argument naming the dead-letter exchange
pub const DEAD_LETTER_EXCHANGE_ARGUMENT: &str = "x-dead-letter-exchange";

/// Definition of the exchange, queue and binding used by a single call.
///
/// This struct implements the builder pattern. Queues are durable, non-exclusive
/// and not auto-deleted unless told otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyDescriptor {
    pub(crate) exchange_name: String,
    pub(crate) exchange_kind: ExchangeKind,
    pub(crate) queue_name: String,
    pub(crate) routing_key: String,
    pub(crate) durable: bool,
    pub(crate) exclusive: bool,
    pub(crate) auto_delete: bool,
    pub(crate) queue_arguments: Headers,
}

impl TopologyDescriptor {
    /// Creates a new descriptor binding `queue` to the direct exchange `exchange`.
    ///
    /// # Parameters
    /// * `exchange` - The name of the exchange
    /// * `queue` - The name of the queue
    ///
    /// # Returns
    /// A new descriptor with an empty routing key
    pub fn new(exchange: &str, queue: &str) -> TopologyDescriptor {
        TopologyDescriptor {
            exchange_name: exchange.to_owned(),
            exchange_kind: ExchangeKind::Direct,
            queue_name: queue.to_owned(),
            routing_key: String::new(),
            durable: true,
            exclusive: false,
            auto_delete: false,
            queue_arguments: Headers::new(),
        }
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.exchange_kind = kind;
        self
    }

    /// Sets the routing key used for both the binding and the publish.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    /// Sets whether the exchange and the queue survive a broker restart.
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Sets the queue to auto-delete when its last consumer goes away.
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    /// Adds an optional argument to the queue declaration.
    ///
    /// Redeclaring an existing queue with different arguments is a topology conflict.
    pub fn queue_argument(mut self, key: &str, value: impl Into<HeaderValue>) -> Self {
        self.queue_arguments.insert(key.to_owned(), value.into());
        self
    }

    /// Declares the queue as a quorum queue.
    ///
    /// Quorum queues must be durable, and they report the number of delivery attempts
    /// in `x-delivery-count`, which `MaxDeliveries` relies on.
    pub fn quorum(self) -> Self {
        self.queue_argument(QUEUE_TYPE_ARGUMENT, "quorum")
    }

    /// Sends messages rejected without requeue to `exchange`.
    pub fn dead_letter_exchange(self, exchange: &str) -> Self {
        self.queue_argument(DEAD_LETTER_EXCHANGE_ARGUMENT, exchange)
    }

    /// Name of the exchange.
    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    /// Type of the exchange.
    pub fn exchange_kind(&self) -> ExchangeKind {
        self.exchange_kind
    }

    /// Name of the queue.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Routing key of the binding and of published messages.
    pub fn key(&self) -> &str {
        &self.routing_key
    }

    /// Arguments passed to the queue declaration.
    pub fn queue_arguments(&self) -> &Headers {
        &self.queue_arguments
    }

    /// Checks the routing key rule: every kind but fanout needs a non-blank key.
    ///
    /// This never touches the broker, so callers run it before any declare or
    /// publish and an invalid request leaves no side effects behind.
    pub fn validate(&self) -> Result<(), AmqpError> {
        if self.exchange_kind.requires_routing_key() && self.routing_key.trim().is_empty() {
            return Err(AmqpError::MissingRoutingKey(
                self.exchange_name.clone(),
                self.exchange_kind.to_string(),
            ));
        }

        Ok(())
    }
}
