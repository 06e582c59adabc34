// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module handles the creation of the AMQP connection and channel shared by the
//! gateways. Both are returned to the caller, who owns their lifetime: closing a
//! subscription never closes the channel or the connection.

use crate::{configs::RabbitMQConfigs, errors::AmqpError};
use lapin::{tcp::OwnedTLSConfig, types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Creates a new AMQP channel for communication with RabbitMQ.
///
/// This function validates the settings, establishes a connection (over TLS when
/// enabled), then creates a channel on that connection.
///
/// # Parameters
/// * `cfg` - Connection details like host, port, credentials and TLS
///
/// # Returns
/// * `Result<(Arc<Connection>, Arc<Channel>), AmqpError>` -
///   A tuple containing the connection and channel on success, or an error on failure.
///
/// # Example
/// ```no_run
/// # async fn run() -> Result<(), easy_rabbitmq::errors::AmqpError> {
/// use easy_rabbitmq::{channel::new_amqp_channel, configs::RabbitMQConfigs};
///
/// let (_conn, _channel) = new_amqp_channel(&RabbitMQConfigs::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn new_amqp_channel(
    cfg: &RabbitMQConfigs,
) -> Result<(Arc<Connection>, Arc<Channel>), AmqpError> {
    cfg.validate()?;

    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.connection_name.clone()));

    let uri = cfg.uri();

    let connected = if cfg.tls.enabled {
        let tls = OwnedTLSConfig {
            cert_chain: cfg.tls.ca_cert_chain.clone(),
            ..Default::default()
        };
        Connection::connect_uri_with_config(uri, options, tls).await
    } else {
        Connection::connect_uri(uri, options).await
    };

    let conn = match connected {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(
                error = err.to_string(),
                host = %cfg.host,
                tls = cfg.tls.enabled,
                "failure to connect"
            );
            Err(AmqpError::ConnectionError)
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((Arc::new(conn), Arc::new(c)))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError)
        }
    }
}
