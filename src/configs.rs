// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration
//!
//! Plain configuration structs handed to the bootstrap function and to the gateway
//! constructors by value. They derive `Deserialize` so any settings source can bind
//! them; loading them from the environment or from files is left to the host process.

use crate::errors::AmqpError;
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo};
use serde::Deserialize;

/// Connection settings for the RabbitMQ server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// Name reported to the broker for this connection.
    pub connection_name: String,
    pub tls: TlsConfigs,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            connection_name: "easy-rabbitmq".to_owned(),
            tls: TlsConfigs::default(),
        }
    }
}

/// Optional TLS settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsConfigs {
    pub enabled: bool,
    /// Name the server certificate is issued for.
    ///
    /// lapin verifies the certificate against the host it dials, so when set this
    /// name is dialed instead of `host` and must resolve to the broker.
    pub server_name: Option<String>,
    /// PEM encoded CA chain used to verify the server, on top of the system roots.
    pub ca_cert_chain: Option<String>,
}

impl RabbitMQConfigs {
    /// Rejects settings that cannot produce a usable connection.
    pub fn validate(&self) -> Result<(), AmqpError> {
        let required = [
            ("host", &self.host),
            ("user", &self.user),
            ("password", &self.password),
            ("vhost", &self.vhost),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(AmqpError::InvalidConfigs(format!("`{}` is required", field)));
            }
        }

        if self.tls.enabled
            && self
                .tls
                .server_name
                .as_ref()
                .is_some_and(|name| name.trim().is_empty())
        {
            return Err(AmqpError::InvalidConfigs(
                "`tls.server_name` must not be blank".to_owned(),
            ));
        }

        Ok(())
    }

    /// Builds the AMQP URI for these settings.
    ///
    /// Credentials and vhost are kept as is; lapin escapes them on the wire.
    pub fn uri(&self) -> AMQPUri {
        let (scheme, host) = match (self.tls.enabled, &self.tls.server_name) {
            (true, Some(name)) => (AMQPScheme::AMQPS, name.clone()),
            (true, None) => (AMQPScheme::AMQPS, self.host.clone()),
            (false, _) => (AMQPScheme::AMQP, self.host.clone()),
        };

        AMQPUri {
            scheme,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user.clone(),
                    password: self.password.clone(),
                },
                host,
                port: self.port,
            },
            vhost: self.vhost.clone(),
            query: AMQPQueryString::default(),
        }
    }
}

/// Settings applied to every message sent by a `RabbitMQPublisher`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PublisherConfigs {
    /// Ask the broker to return messages no queue is bound for.
    pub mandatory: bool,
    /// Mark messages persistent (delivery mode 2).
    pub persistent: bool,
}

/// Settings applied to consumers registered by a `RabbitMQSubscriber`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SubscriberConfigs {
    /// Prefix of the generated consumer tags.
    pub consumer_tag_prefix: String,
    /// Maximum number of unacknowledged deliveries, unlimited when `None`.
    pub prefetch_count: Option<u16>,
}

impl Default for SubscriberConfigs {
    fn default() -> Self {
        SubscriberConfigs {
            consumer_tag_prefix: "easy-rabbitmq".to_owned(),
            prefetch_count: None,
        }
    }
}
