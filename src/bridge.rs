// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Receive One
//!
//! The `AsyncBridge` turns the continuous delivery stream of a subscription into a
//! single awaited result. The first delivery that decodes into `T` resolves the
//! pending receive; cancellation rejects it. Resolution is first-writer-wins, so a
//! late delivery racing a cancellation cannot resolve twice.
//!
//! What happens to the subscription afterwards is chosen with `ListenerMode`. The
//! choice also holds when the `receive_one` future is dropped before it completes.

use crate::{
    descriptor::TopologyDescriptor,
    errors::AmqpError,
    handler::{HandlerError, MessageHandler},
    subscriber::{RabbitMQSubscriber, SubscriptionHandle},
};
use async_trait::async_trait;
use opentelemetry::Context;
use serde::de::DeserializeOwned;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What becomes of the underlying subscription once `receive_one` returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListenerMode {
    /// The consumer stays registered; every later delivery is acked and discarded.
    #[default]
    KeepListening,
    /// The consumer is cancelled as soon as the receive resolves, is cancelled or is
    /// dropped. Deliveries it no longer surfaces go back to the queue.
    CloseAfterFirst,
}

/// Single-use result slot.
struct PendingReceive<T> {
    slot: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> PendingReceive<T> {
    fn new(sender: oneshot::Sender<T>) -> PendingReceive<T> {
        PendingReceive {
            slot: Mutex::new(Some(sender)),
        }
    }

    /// Takes the sender; only the first caller gets it.
    fn take(&self) -> Option<oneshot::Sender<T>> {
        match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Handler resolving the pending receive with the first message.
struct Resolver<T> {
    pending: Arc<PendingReceive<T>>,
    mode: ListenerMode,
}

#[async_trait]
impl<T> MessageHandler<T> for Resolver<T>
where
    T: Send + 'static,
{
    async fn handle(&self, _ctx: &Context, message: T) -> Result<(), HandlerError> {
        match self.pending.take() {
            Some(sender) => sender
                .send(message)
                .map_err(|_| "receiver gone, returning message to the queue".into()),
            None if self.mode == ListenerMode::CloseAfterFirst => {
                Err("receive already settled, returning message to the queue".into())
            }
            None => {
                debug!("receive already settled, discarding message");
                Ok(())
            }
        }
    }
}

/// Applies the `ListenerMode` to the subscription, also when the receive is dropped.
struct ReceiveGuard {
    handle: Option<SubscriptionHandle>,
    mode: ListenerMode,
}

impl ReceiveGuard {
    /// Resolves once the dispatch task has stopped.
    async fn stopped(&self) {
        match &self.handle {
            Some(handle) => handle.stopped().await,
            None => std::future::pending().await,
        }
    }

    async fn release(mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        match self.mode {
            ListenerMode::CloseAfterFirst => {
                if let Err(err) = handle.close().await {
                    warn!(error = err.to_string(), "failure to close the subscription");
                }
            }
            ListenerMode::KeepListening => {
                debug!(
                    consumer_tag = handle.consumer_tag(),
                    "subscription left listening"
                );
            }
        }
    }
}

impl Drop for ReceiveGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if self.mode == ListenerMode::CloseAfterFirst {
                debug!(
                    consumer_tag = handle.consumer_tag(),
                    "receive dropped, closing the subscription"
                );
                handle.close_detached();
            }
        }
    }
}

/// Receives single messages on top of a subscriber.
pub struct AsyncBridge {
    subscriber: Arc<RabbitMQSubscriber>,
}

impl AsyncBridge {
    /// Creates a bridge subscribing through `subscriber`.
    pub fn new(subscriber: Arc<RabbitMQSubscriber>) -> AsyncBridge {
        AsyncBridge { subscriber }
    }

    /// Waits for the first message of type `T` on the queue of `def`.
    ///
    /// Deliveries that fail to decode are requeued and do not resolve the receive.
    /// Cancellation is cooperative: a delivery already being handled still runs to
    /// completion and is acked. Dropping the returned future applies `mode` as well.
    ///
    /// # Parameters
    /// * `def` - Exchange, queue and binding to subscribe with
    /// * `cancel` - Rejects the receive with `Cancelled` when fired
    /// * `mode` - Whether the consumer outlives the receive
    ///
    /// # Returns
    /// The first message, `Cancelled`, or the validation, topology or consumer error
    pub async fn receive_one<T>(
        &self,
        def: &TopologyDescriptor,
        cancel: CancellationToken,
        mode: ListenerMode,
    ) -> Result<T, AmqpError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (sender, mut receiver) = oneshot::channel();
        let pending = Arc::new(PendingReceive::new(sender));

        let handle = self
            .subscriber
            .subscribe_with::<T>(
                def,
                Arc::new(Resolver {
                    pending: pending.clone(),
                    mode,
                }),
            )
            .await?;
        let guard = ReceiveGuard {
            handle: Some(handle),
            mode,
        };

        let result = tokio::select! {
            biased;
            received = &mut receiver => received.map_err(|_| AmqpError::InternalError),
            _ = cancel.cancelled() => {
                settle_interrupted(&pending, &mut receiver, AmqpError::Cancelled).await
            }
            _ = guard.stopped() => {
                let err = AmqpError::ConsumerError(def.queue_name.clone());
                settle_interrupted(&pending, &mut receiver, err).await
            }
        };

        guard.release().await;

        result
    }

    /// Like `receive_one`, cancelled after `timeout`.
    pub async fn receive_one_within<T>(
        &self,
        def: &TopologyDescriptor,
        timeout: Duration,
        mode: ListenerMode,
    ) -> Result<T, AmqpError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let timer = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            }
        });

        let result = self.receive_one(def, cancel, mode).await;
        timer.abort();
        result
    }
}

/// Closes the slot after an interruption. When a delivery won the race and already
/// took the sender, its message is returned instead of `reason`.
async fn settle_interrupted<T>(
    pending: &PendingReceive<T>,
    receiver: &mut oneshot::Receiver<T>,
    reason: AmqpError,
) -> Result<T, AmqpError> {
    match pending.take() {
        Some(_) => Err(reason),
        None => receiver.await.map_err(|_| reason),
    }
}
