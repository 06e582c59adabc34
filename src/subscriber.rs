// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Subscriber
//!
//! This module provides the subscribe gateway. A subscription ensures its topology,
//! registers a manual-ack consumer and routes every delivery through a
//! `DeliveryHandler`, one at a time and in broker order, on a spawned task.
//!
//! The subscription runs until its `SubscriptionHandle` is closed or the broker ends
//! the consumer. Dropping the handle without closing it leaves the consumer running.

use crate::{
    configs::SubscriberConfigs,
    descriptor::TopologyDescriptor,
    errors::AmqpError,
    handler::{DeliveryHandler, MessageHandler, RequeuePolicy, UnlimitedRequeue},
    topology::TopologyManager,
    transport::{DeliveryStream, Transport},
};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

/// Registers typed consumers on queues.
pub struct RabbitMQSubscriber {
    transport: Arc<dyn Transport>,
    topology: TopologyManager,
    configs: SubscriberConfigs,
    policy: Arc<dyn RequeuePolicy>,
}

impl RabbitMQSubscriber {
    /// Creates a new subscriber that requeues failed deliveries without limit.
    ///
    /// # Parameters
    /// * `transport` - The transport shared with other gateways
    /// * `configs` - Consumer settings
    ///
    /// # Returns
    /// An Arc-wrapped RabbitMQSubscriber instance for thread-safe sharing
    pub fn new(transport: Arc<dyn Transport>, configs: SubscriberConfigs) -> Arc<RabbitMQSubscriber> {
        Self::with_requeue_policy(transport, configs, Arc::new(UnlimitedRequeue))
    }

    /// Creates a new subscriber applying `policy` to failed deliveries.
    pub fn with_requeue_policy(
        transport: Arc<dyn Transport>,
        configs: SubscriberConfigs,
        policy: Arc<dyn RequeuePolicy>,
    ) -> Arc<RabbitMQSubscriber> {
        Arc::new(RabbitMQSubscriber {
            topology: TopologyManager::new(transport.clone()),
            transport,
            configs,
            policy,
        })
    }

    /// Subscribes `handler` to the queue of `def`.
    ///
    /// # Returns
    /// The handle of the running subscription, or the validation, topology or
    /// consumer declaration error
    pub async fn subscribe<T, H>(
        &self,
        def: &TopologyDescriptor,
        handler: H,
    ) -> Result<SubscriptionHandle, AmqpError>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T> + 'static,
    {
        self.subscribe_with(def, Arc::new(handler)).await
    }

    /// Same as `subscribe`, for a handler that is already shared.
    pub async fn subscribe_with<T>(
        &self,
        def: &TopologyDescriptor,
        handler: Arc<dyn MessageHandler<T>>,
    ) -> Result<SubscriptionHandle, AmqpError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.topology.ensure(def).await?;

        if let Some(prefetch_count) = self.configs.prefetch_count {
            self.transport.qos(prefetch_count).await?;
        }

        let consumer_tag = format!("{}-{}", self.configs.consumer_tag_prefix, Uuid::new_v4());
        let deliveries = self.transport.consume(&def.queue_name, &consumer_tag).await?;

        debug!(
            queue = %def.queue_name,
            consumer_tag = %consumer_tag,
            "waiting for messages"
        );

        let delivery_handler =
            DeliveryHandler::new(self.transport.clone(), handler, self.policy.clone());
        let shutdown = CancellationToken::new();
        let stopped = CancellationToken::new();

        let task = tokio::spawn(dispatch(
            deliveries,
            delivery_handler,
            shutdown.clone(),
            stopped.clone(),
        ));

        Ok(SubscriptionHandle {
            consumer_tag,
            queue: def.queue_name.clone(),
            transport: self.transport.clone(),
            shutdown,
            stopped,
            task,
        })
    }
}

/// Processes deliveries sequentially until the stream ends or `shutdown` fires.
///
/// A delivery already being processed runs to completion before shutdown is seen.
async fn dispatch<T>(
    mut deliveries: DeliveryStream,
    handler: DeliveryHandler<T>,
    shutdown: CancellationToken,
    stopped: CancellationToken,
) where
    T: DeserializeOwned + Send + 'static,
{
    let _stopped = stopped.drop_guard();

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = deliveries.next() => next,
        };

        match next {
            Some(Ok(delivery)) => {
                if let Err(err) = handler.process(&delivery).await {
                    error!(error = err.to_string(), "error consume msg");
                }
            }
            Some(Err(err)) => error!(error = err.to_string(), "errors consume msg"),
            None => {
                debug!("consumer stream ended");
                break;
            }
        }
    }
}

/// A running subscription.
pub struct SubscriptionHandle {
    consumer_tag: String,
    queue: String,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
    stopped: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Tag the consumer is registered under.
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Name of the consumed queue.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Whether the dispatch task has stopped.
    pub fn is_closed(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Resolves once the dispatch task has stopped, for whatever reason.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await
    }

    /// Cancels the consumer and waits for the dispatch task to finish.
    ///
    /// Deliveries the broker already pushed are still processed. The channel and
    /// the connection are left open.
    pub async fn close(self) -> Result<(), AmqpError> {
        debug!(consumer_tag = %self.consumer_tag, "closing subscription");

        let cancelled = self.transport.cancel(&self.consumer_tag).await;
        if cancelled.is_err() {
            self.shutdown.cancel();
        }

        if let Err(err) = self.task.await {
            error!(error = err.to_string(), "tokio process error");
            return Err(AmqpError::InternalError);
        }

        cancelled
    }

    /// Closes the subscription from a spawned task, for callers that cannot await.
    ///
    /// Outside a Tokio runtime only the dispatch task is stopped; the consumer stays
    /// registered until the channel closes.
    pub fn close_detached(self) {
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(err) = self.close().await {
                        error!(error = err.to_string(), "failure to close the subscription");
                    }
                });
            }
            Err(_) => self.shutdown.cancel(),
        }
    }
}
