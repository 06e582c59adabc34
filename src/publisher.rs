// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! This module provides the publish gateway. A publish validates the descriptor,
//! ensures the topology, wraps the payload into the message envelope and hands it to
//! the transport, in that order. A failed publish leaves the declared topology in
//! place.

use crate::{
    configs::PublisherConfigs,
    descriptor::TopologyDescriptor,
    envelope,
    errors::AmqpError,
    otel,
    topology::TopologyManager,
    transport::{Headers, MessageProperties, Transport, JSON_CONTENT_TYPE},
};
use opentelemetry::Context;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Publishes typed messages wrapped into the message envelope.
pub struct RabbitMQPublisher {
    transport: Arc<dyn Transport>,
    topology: TopologyManager,
    configs: PublisherConfigs,
}

impl RabbitMQPublisher {
    /// Creates a new publisher.
    ///
    /// # Parameters
    /// * `transport` - The transport shared with other gateways
    /// * `configs` - Settings applied to every published message
    ///
    /// # Returns
    /// An Arc-wrapped RabbitMQPublisher instance for thread-safe sharing
    pub fn new(transport: Arc<dyn Transport>, configs: PublisherConfigs) -> Arc<RabbitMQPublisher> {
        Arc::new(RabbitMQPublisher {
            topology: TopologyManager::new(transport.clone()),
            transport,
            configs,
        })
    }

    /// Publishes `payload` under its Rust type name.
    pub async fn publish_typed<T>(
        &self,
        payload: &T,
        def: &TopologyDescriptor,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + Sync,
    {
        self.publish(payload, envelope::type_name_of::<T>(), def)
            .await
    }

    /// Publishes `payload` as a message of type `type_name`.
    ///
    /// # Returns
    /// Ok(()) on success, or the validation, topology, encode or transport error
    pub async fn publish<T>(
        &self,
        payload: &T,
        type_name: &str,
        def: &TopologyDescriptor,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.publish_with_headers(&Context::current(), payload, type_name, def, Headers::new())
            .await
    }

    /// Publishes with caller supplied headers and trace context.
    ///
    /// The headers are attached only when the exchange routes by headers; the trace
    /// context of `ctx` is always propagated.
    ///
    /// # Parameters
    /// * `ctx` - OpenTelemetry context for tracing
    /// * `payload` - The message payload
    /// * `type_name` - Type identifier written into the envelope and the `type` property
    /// * `def` - Exchange, queue and binding the message relies on
    /// * `headers` - Headers used by a headers exchange
    ///
    /// # Returns
    /// Ok(()) on success or AmqpError on failure
    pub async fn publish_with_headers<T>(
        &self,
        ctx: &Context,
        payload: &T,
        type_name: &str,
        def: &TopologyDescriptor,
        headers: Headers,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.topology.ensure(def).await?;

        let body = envelope::encode(payload, type_name).inspect_err(|err| {
            error!(error = err.to_string(), "error encoding message");
        })?;

        let mut message_headers = if def.exchange_kind.routes_by_headers() {
            headers
        } else {
            Headers::new()
        };
        otel::inject(ctx, &mut message_headers);

        let properties = MessageProperties {
            content_type: JSON_CONTENT_TYPE.to_owned(),
            message_type: type_name.to_owned(),
            message_id: Uuid::new_v4().to_string(),
            persistent: self.configs.persistent,
            mandatory: self.configs.mandatory,
            headers: message_headers,
        };

        self.transport
            .publish(&def.exchange_name, &def.routing_key, properties, body)
            .await?;

        debug!(
            exchange = %def.exchange_name,
            routing_key = %def.routing_key,
            message_type = type_name,
            "message published"
        );

        Ok(())
    }
}
