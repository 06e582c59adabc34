// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Typed publish/subscribe over RabbitMQ.
//!
//! Messages travel inside a JSON envelope carrying their type name. Every publish and
//! subscribe declares its own exchange, queue and binding, and every delivery is acked
//! on success or nacked back to the queue on failure.

mod otel;
#[cfg(test)]
mod test_support;

pub mod amqp;
pub mod bridge;
pub mod channel;
pub mod configs;
pub mod descriptor;
pub mod envelope;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod publisher;
pub mod subscriber;
pub mod topology;
pub mod transport;
