// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Handling
//!
//! Every delivery goes through the same state machine:
//!
//! ```text
//! Received -> Decoding -> Decoded -> Dispatching -> Acked
//!                 |                       |
//!            DecodeFailed           HandlerFailed
//!                 \_______________________/
//!                             |
//!                  Requeued (or Rejected by policy)
//! ```
//!
//! The settlement is a pure function of the decode and dispatch outcome, and acking
//! or nacking is the only effect the broker sees. The handler's own side effects are
//! not coupled to the ack: a message is acked as soon as the handler returns `Ok`.

use crate::{
    envelope::{self, MessageEnvelope},
    errors::AmqpError,
    otel,
    transport::{Delivery, Transport},
};
use async_trait::async_trait;
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
    Context,
};
use serde::de::DeserializeOwned;
use std::{borrow::Cow, sync::Arc};
use tracing::{debug, error, warn};

/// Span name used when the envelope cannot be read
const UNKNOWN_MESSAGE_TYPE: &str = "unknown";

/// Error type returned by message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked with each successfully decoded message.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync {
    async fn handle(&self, ctx: &Context, message: T) -> Result<(), HandlerError>;
}

#[async_trait]
impl<T, F> MessageHandler<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, _ctx: &Context, message: T) -> Result<(), HandlerError> {
        (self)(message)
    }
}

/// Decides whether a failed delivery goes back to the queue.
///
/// Returning `false` nacks without requeue, which lets a dead-letter exchange
/// configured on the queue take the message.
pub trait RequeuePolicy: Send + Sync {
    fn requeue(&self, delivery: &Delivery, failure: &AmqpError) -> bool;
}

/// Requeues every failed delivery, forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedRequeue;

impl RequeuePolicy for UnlimitedRequeue {
    fn requeue(&self, _delivery: &Delivery, _failure: &AmqpError) -> bool {
        true
    }
}

/// Rejects a delivery once it reached `limit` attempts.
///
/// Relies on the broker delivery count, which classic queues do not report on a
/// requeue. Declare the queue with `TopologyDescriptor::quorum`; deliveries without
/// a count are always requeued.
#[derive(Debug, Clone, Copy)]
pub struct MaxDeliveries {
    pub limit: u32,
}

impl RequeuePolicy for MaxDeliveries {
    fn requeue(&self, delivery: &Delivery, _failure: &AmqpError) -> bool {
        match delivery.delivery_count {
            // the count reports previous attempts
            Some(count) => count.saturating_add(1) < self.limit,
            None => true,
        }
    }
}

/// States a delivery moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    Decoding,
    Decoded,
    Dispatching,
    DecodeFailed,
    HandlerFailed,
    Acked,
    Requeued,
    Rejected,
}

/// Terminal outcome of a delivery, as seen by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Requeued,
    Rejected,
}

impl Settlement {
    /// Maps the processing outcome to an acknowledgment.
    pub fn decide(outcome: &Result<(), AmqpError>, requeue: bool) -> Settlement {
        match outcome {
            Ok(()) => Settlement::Acked,
            Err(_) if requeue => Settlement::Requeued,
            Err(_) => Settlement::Rejected,
        }
    }

    /// The terminal `DeliveryState` of this settlement.
    pub fn state(&self) -> DeliveryState {
        match self {
            Settlement::Acked => DeliveryState::Acked,
            Settlement::Requeued => DeliveryState::Requeued,
            Settlement::Rejected => DeliveryState::Rejected,
        }
    }
}

/// Runs one delivery through decode, dispatch and acknowledgment.
pub struct DeliveryHandler<T> {
    transport: Arc<dyn Transport>,
    handler: Arc<dyn MessageHandler<T>>,
    policy: Arc<dyn RequeuePolicy>,
    tracer: BoxedTracer,
}

impl<T> DeliveryHandler<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new(
        transport: Arc<dyn Transport>,
        handler: Arc<dyn MessageHandler<T>>,
        policy: Arc<dyn RequeuePolicy>,
    ) -> DeliveryHandler<T> {
        DeliveryHandler {
            transport,
            handler,
            policy,
            tracer: global::tracer("amqp consumer"),
        }
    }

    /// Processes a delivery and acks or nacks it.
    ///
    /// Decode and handler failures never escape: they become a nack. Only a failure
    /// to ack or nack itself is returned.
    ///
    /// # Parameters
    /// * `delivery` - The delivery received from the transport
    ///
    /// # Returns
    /// The settlement applied to the delivery, or the ack/nack error
    pub async fn process(&self, delivery: &Delivery) -> Result<Settlement, AmqpError> {
        let tag = delivery.delivery_tag;
        trace_state(tag, DeliveryState::Received);

        trace_state(tag, DeliveryState::Decoding);
        let decoded = envelope::decode(&delivery.data);

        let span_name = match &decoded {
            Ok(envelope) => envelope.message_type.clone(),
            Err(_) => UNKNOWN_MESSAGE_TYPE.to_owned(),
        };
        let (ctx, mut span) = otel::new_span(&delivery.headers, &self.tracer, &span_name);

        let outcome = match decoded {
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    delivery_tag = tag,
                    routing_key = %delivery.routing_key,
                    "received an invalid message envelope"
                );
                trace_state(tag, DeliveryState::DecodeFailed);
                Err(err)
            }
            Ok(envelope) => {
                trace_state(tag, DeliveryState::Decoded);
                self.dispatch(&ctx, tag, &envelope).await
            }
        };

        let requeue = match &outcome {
            Ok(()) => true,
            Err(err) => self.policy.requeue(delivery, err),
        };
        let settlement = Settlement::decide(&outcome, requeue);

        match &outcome {
            Ok(()) => span.set_status(Status::Ok),
            Err(err) => {
                span.record_error(err);
                span.set_status(Status::Error {
                    description: Cow::from(err.to_string()),
                });
            }
        }

        if let Err(err) = self.settle(tag, settlement).await {
            span.record_error(&err);
            return Err(err);
        }

        trace_state(tag, settlement.state());
        Ok(settlement)
    }

    async fn dispatch(
        &self,
        ctx: &Context,
        tag: u64,
        envelope: &MessageEnvelope,
    ) -> Result<(), AmqpError> {
        let message = envelope.payload::<T>().inspect_err(|err| {
            warn!(error = err.to_string(), "deserialization of the message failed");
            trace_state(tag, DeliveryState::HandlerFailed);
        })?;

        trace_state(tag, DeliveryState::Dispatching);
        match self.handler.handle(ctx, message).await {
            Ok(()) => {
                debug!("message successfully processed");
                Ok(())
            }
            Err(err) => {
                error!(error = err.to_string(), "error whiling handling msg");
                trace_state(tag, DeliveryState::HandlerFailed);
                Err(AmqpError::HandlerError(err.to_string()))
            }
        }
    }

    async fn settle(&self, tag: u64, settlement: Settlement) -> Result<(), AmqpError> {
        match settlement {
            Settlement::Acked => self.transport.ack(tag).await,
            Settlement::Requeued => {
                warn!(delivery_tag = tag, "requeuing message");
                self.transport.nack(tag, true).await
            }
            Settlement::Rejected => {
                error!(delivery_tag = tag, "too many attempts, rejecting message");
                self.transport.nack(tag, false).await
            }
        }
    }
}

fn trace_state(tag: u64, state: DeliveryState) {
    debug!(delivery_tag = tag, state = ?state, "delivery state");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{delivery, InMemoryTransport};
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
    }

    type Seen = Arc<Mutex<Vec<Order>>>;

    fn recording(fail: bool) -> (Arc<dyn MessageHandler<Order>>, Seen) {
        let seen: Seen = Arc::default();
        let sink = seen.clone();
        let handler: Arc<dyn MessageHandler<Order>> =
            Arc::new(move |order: Order| -> Result<(), HandlerError> {
                sink.lock().unwrap().push(order);
                if fail {
                    return Err("downstream unavailable".into());
                }
                Ok(())
            });
        (handler, seen)
    }

    fn handler_with(
        transport: &Arc<InMemoryTransport>,
        handler: Arc<dyn MessageHandler<Order>>,
        policy: Arc<dyn RequeuePolicy>,
    ) -> DeliveryHandler<Order> {
        DeliveryHandler::new(transport.clone(), handler, policy)
    }

    #[test]
    fn settlement_is_pure_function_of_outcome() {
        assert_eq!(Settlement::decide(&Ok(()), false), Settlement::Acked);
        let failed = Err(AmqpError::DecodeError("eof".into()));
        assert_eq!(Settlement::decide(&failed, true), Settlement::Requeued);
        assert_eq!(Settlement::decide(&failed, false), Settlement::Rejected);
    }

    #[tokio::test]
    async fn valid_envelope_is_dispatched_then_acked() {
        let transport = InMemoryTransport::new();
        let (callback, seen) = recording(false);
        let handler = handler_with(&transport, callback, Arc::new(UnlimitedRequeue));

        let body = envelope::encode(&Order { id: 42 }, "Order").unwrap();
        let settlement = handler.process(&delivery(1, &body)).await;

        assert_eq!(settlement, Ok(Settlement::Acked));
        assert_eq!(*seen.lock().unwrap(), vec![Order { id: 42 }]);
        assert_eq!(transport.acks(), vec![1]);
        assert!(transport.nacks().is_empty());
    }

    #[tokio::test]
    async fn malformed_envelope_is_requeued_without_dispatch() {
        let transport = InMemoryTransport::new();
        let (callback, seen) = recording(false);
        let handler = handler_with(&transport, callback, Arc::new(UnlimitedRequeue));

        let settlement = handler.process(&delivery(7, b"{not an envelope")).await;

        assert_eq!(settlement, Ok(Settlement::Requeued));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(transport.nacks(), vec![(7, true)]);
        assert!(transport.acks().is_empty());
    }

    #[tokio::test]
    async fn payload_type_mismatch_is_requeued() {
        let transport = InMemoryTransport::new();
        let (callback, seen) = recording(false);
        let handler = handler_with(&transport, callback, Arc::new(UnlimitedRequeue));

        let body = envelope::encode(&"just a string", "Order").unwrap();
        let settlement = handler.process(&delivery(3, &body)).await;

        assert_eq!(settlement, Ok(Settlement::Requeued));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(transport.nacks(), vec![(3, true)]);
    }

    #[tokio::test]
    async fn handler_failure_is_requeued() {
        let transport = InMemoryTransport::new();
        let (callback, seen) = recording(true);
        let handler = handler_with(&transport, callback, Arc::new(UnlimitedRequeue));

        let body = envelope::encode(&Order { id: 1 }, "Order").unwrap();
        let settlement = handler.process(&delivery(4, &body)).await;

        assert_eq!(settlement, Ok(Settlement::Requeued));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(transport.nacks(), vec![(4, true)]);
        assert!(transport.acks().is_empty());
    }

    #[tokio::test]
    async fn max_deliveries_rejects_poison_message() {
        let transport = InMemoryTransport::new();
        let (callback, _) = recording(true);
        let handler = handler_with(&transport, callback, Arc::new(MaxDeliveries { limit: 3 }));
        let body = envelope::encode(&Order { id: 1 }, "Order").unwrap();

        let mut first = delivery(1, &body);
        first.delivery_count = Some(1);
        let mut last = delivery(2, &body);
        last.delivery_count = Some(2);

        assert_eq!(handler.process(&first).await, Ok(Settlement::Requeued));
        assert_eq!(handler.process(&last).await, Ok(Settlement::Rejected));
        assert_eq!(transport.nacks(), vec![(1, true), (2, false)]);
    }

    #[test]
    fn max_deliveries_without_count_requeues() {
        let policy = MaxDeliveries { limit: 1 };
        let failure = AmqpError::HandlerError("boom".into());
        assert!(policy.requeue(&delivery(1, b""), &failure));
    }

    #[tokio::test]
    async fn ack_failure_is_reported() {
        let mut mock = crate::transport::MockTransport::new();
        mock.expect_ack().returning(|_| Err(AmqpError::AckMessageError));
        let (callback, _) = recording(false);
        let handler: DeliveryHandler<Order> =
            DeliveryHandler::new(Arc::new(mock), callback, Arc::new(UnlimitedRequeue));

        let body = envelope::encode(&Order { id: 1 }, "Order").unwrap();
        assert_eq!(
            handler.process(&delivery(1, &body)).await,
            Err(AmqpError::AckMessageError)
        );
    }
}
