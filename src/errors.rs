// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Messaging Adapter
//!
//! This module provides the error taxonomy shared by every component of the crate.
//! The `AmqpError` enum covers configuration, validation, topology, envelope codec,
//! handler and transport failures. Each variant belongs to exactly one category,
//! exposed through the `is_*` classifier methods.

use thiserror::Error;

/// Represents errors that can occur while publishing or consuming typed messages.
///
/// Validation errors are raised before any broker call. Topology errors wrap broker
/// rejections of declare/bind calls. Codec errors come from the two-layer envelope.
/// Transport errors come from the connection or channel itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Connection settings are incomplete
    #[error("invalid rabbitmq configs: `{0}`")]
    InvalidConfigs(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// A non-fanout exchange was given an empty routing key
    #[error("routing key is required for the {1} exchange `{0}`")]
    MissingRoutingKey(String, String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// The broker already holds an entity with the same name but other parameters
    #[error("topology conflict on `{0}`")]
    TopologyConflict(String),

    /// The payload could not be serialized
    #[error("failure to encode payload: {0}")]
    EncodeError(String),

    /// The outer envelope is malformed
    #[error("failure to decode envelope: {0}")]
    DecodeError(String),

    /// The envelope body is not a valid value of the expected type
    #[error("payload `{0}` does not match the expected type: {1}")]
    PayloadTypeMismatch(String, String),

    /// The registered message handler reported a failure
    #[error("message handler failure: {0}")]
    HandlerError(String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer
    #[error("consumer declaration error `{0}`")]
    ConsumerDeclarationError(String),

    /// Error cancelling a consumer
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// A pending receive was cancelled or timed out before a message arrived
    #[error("receive cancelled")]
    Cancelled,
}

impl AmqpError {
    /// Errors raised before any broker call, fixable by correcting the input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AmqpError::MissingRoutingKey(..) | AmqpError::InvalidConfigs(_)
        )
    }

    /// Declare or bind calls rejected by the broker.
    pub fn is_topology(&self) -> bool {
        matches!(
            self,
            AmqpError::DeclareExchangeError(_)
                | AmqpError::DeclareQueueError(_)
                | AmqpError::BindingExchangeToQueueError(..)
                | AmqpError::TopologyConflict(_)
        )
    }

    /// Envelope or payload (de)serialization failures.
    pub fn is_codec(&self) -> bool {
        matches!(
            self,
            AmqpError::EncodeError(_)
                | AmqpError::DecodeError(_)
                | AmqpError::PayloadTypeMismatch(..)
        )
    }

    /// Connection or channel level failures.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AmqpError::ConnectionError
                | AmqpError::ChannelError
                | AmqpError::PublishingError
                | AmqpError::QoSDeclarationError(_)
                | AmqpError::ConsumerDeclarationError(_)
                | AmqpError::CancelConsumerError(_)
                | AmqpError::ConsumerError(_)
                | AmqpError::AckMessageError
                | AmqpError::NackMessageError
        )
    }
}
