// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker used by the unit tests.
//!
//! Declarations are idempotent and redeclaring an exchange or a queue with other
//! parameters is a conflict, like on RabbitMQ. Deliveries are pushed by the test through
//! `deliver` and every ack/nack is recorded.

use crate::{
    errors::AmqpError,
    exchange::ExchangeKind,
    transport::{Delivery, DeliveryStream, Headers, MessageProperties, Transport},
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, (ExchangeKind, bool)>,
    queues: HashMap<String, (bool, bool, bool, Headers)>,
    bindings: BTreeSet<(String, String, String)>,
    published: Vec<Published>,
    acks: Vec<u64>,
    nacks: Vec<(u64, bool)>,
    consumers: HashMap<String, mpsc::UnboundedSender<Result<Delivery, AmqpError>>>,
    cancelled: Vec<String>,
    qos: Option<u16>,
    calls: usize,
    fail_publish: bool,
}

#[derive(Default)]
pub(crate) struct InMemoryTransport {
    state: Mutex<State>,
}

impl InMemoryTransport {
    pub fn new() -> Arc<InMemoryTransport> {
        Arc::new(InMemoryTransport::default())
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn fail_publish(&self) {
        self.with(|s| s.fail_publish = true);
    }

    /// Number of transport calls issued so far.
    pub fn calls(&self) -> usize {
        self.with(|s| s.calls)
    }

    pub fn bindings(&self) -> Vec<(String, String, String)> {
        self.with(|s| s.bindings.iter().cloned().collect())
    }

    pub fn exchange_kind(&self, name: &str) -> Option<ExchangeKind> {
        self.with(|s| s.exchanges.get(name).map(|(kind, _)| *kind))
    }

    pub fn published(&self) -> Vec<Published> {
        self.with(|s| s.published.clone())
    }

    pub fn acks(&self) -> Vec<u64> {
        self.with(|s| s.acks.clone())
    }

    pub fn nacks(&self) -> Vec<(u64, bool)> {
        self.with(|s| s.nacks.clone())
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.with(|s| s.cancelled.clone())
    }

    pub fn qos_value(&self) -> Option<u16> {
        self.with(|s| s.qos)
    }

    pub fn consumer_count(&self) -> usize {
        self.with(|s| s.consumers.len())
    }

    /// Pushes a delivery to every registered consumer.
    pub fn deliver(&self, delivery: Delivery) {
        self.with(|s| {
            for sender in s.consumers.values() {
                let _ = sender.send(Ok(delivery.clone()));
            }
        });
    }

    /// Pushes a consumer level failure to every registered consumer.
    pub fn deliver_error(&self, err: AmqpError) {
        self.with(|s| {
            for sender in s.consumers.values() {
                let _ = sender.send(Err(err.clone()));
            }
        });
    }

    /// Waits until `count` deliveries have been acked or nacked.
    pub async fn settled(&self, count: usize) {
        for _ in 0..200 {
            if self.with(|s| s.acks.len() + s.nacks.len()) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("deliveries were not settled in time");
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError> {
        self.with(|s| {
            s.calls += 1;
            match s.exchanges.get(name) {
                Some(existing) if *existing != (kind, durable) => {
                    Err(AmqpError::TopologyConflict(name.to_owned()))
                }
                _ => {
                    s.exchanges.insert(name.to_owned(), (kind, durable));
                    Ok(())
                }
            }
        })
    }

    async fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
        arguments: &Headers,
    ) -> Result<(), AmqpError> {
        self.with(|s| {
            s.calls += 1;
            let params = (durable, exclusive, auto_delete, arguments.clone());
            match s.queues.get(name) {
                Some(existing) if *existing != params => {
                    Err(AmqpError::TopologyConflict(name.to_owned()))
                }
                _ => {
                    s.queues.insert(name.to_owned(), params);
                    Ok(())
                }
            }
        })
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        self.with(|s| {
            s.calls += 1;
            if !s.exchanges.contains_key(exchange) || !s.queues.contains_key(queue) {
                return Err(AmqpError::BindingExchangeToQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ));
            }
            s.bindings.insert((
                queue.to_owned(),
                exchange.to_owned(),
                routing_key.to_owned(),
            ));
            Ok(())
        })
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Result<(), AmqpError> {
        self.with(|s| {
            s.calls += 1;
            if s.fail_publish {
                return Err(AmqpError::PublishingError);
            }
            s.published.push(Published {
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
                properties,
                body,
            });
            Ok(())
        })
    }

    async fn qos(&self, prefetch_count: u16) -> Result<(), AmqpError> {
        self.with(|s| {
            s.calls += 1;
            s.qos = Some(prefetch_count);
            Ok(())
        })
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AmqpError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.with(|s| {
            s.calls += 1;
            if !s.queues.contains_key(queue) {
                return Err(AmqpError::ConsumerDeclarationError(queue.to_owned()));
            }
            s.consumers.insert(consumer_tag.to_owned(), tx);
            Ok(())
        })?;

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.with(|s| {
            s.calls += 1;
            s.consumers.remove(consumer_tag);
            s.cancelled.push(consumer_tag.to_owned());
            Ok(())
        })
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.with(|s| {
            s.calls += 1;
            s.acks.push(delivery_tag);
            Ok(())
        })
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.with(|s| {
            s.calls += 1;
            s.nacks.push((delivery_tag, requeue));
            Ok(())
        })
    }
}

/// Builds a delivery carrying `data`.
pub(crate) fn delivery(tag: u64, data: &[u8]) -> Delivery {
    Delivery {
        delivery_tag: tag,
        exchange: "orders".to_owned(),
        routing_key: "eu.fr".to_owned(),
        data: data.to_vec(),
        ..Default::default()
    }
}
