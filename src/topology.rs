// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Management
//!
//! The `TopologyManager` converges the broker onto a `TopologyDescriptor`: exchange,
//! queue and binding are declared on every call, by publishers and subscribers alike.
//! Declarations are idempotent at the broker, so no declare-once registry is kept
//! and gateway instances share no mutable state.

use crate::{descriptor::TopologyDescriptor, errors::AmqpError, transport::Transport};
use std::sync::Arc;
use tracing::debug;

/// Issues declare and bind calls for a descriptor.
#[derive(Clone)]
pub struct TopologyManager {
    transport: Arc<dyn Transport>,
}

impl TopologyManager {
    /// Creates a manager issuing its calls through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> TopologyManager {
        TopologyManager { transport }
    }

    /// Declares the exchange, then the queue, then binds them.
    ///
    /// The descriptor is validated first; an invalid descriptor issues no transport
    /// call. Calling `ensure` again with the same descriptor is harmless.
    ///
    /// # Parameters
    /// * `def` - The topology to converge on
    ///
    /// # Returns
    /// Ok(()) on success, the validation error, or the topology error reported by
    /// the broker for the first failing call
    pub async fn ensure(&self, def: &TopologyDescriptor) -> Result<(), AmqpError> {
        def.validate()?;

        self.transport
            .declare_exchange(&def.exchange_name, def.exchange_kind, def.durable)
            .await?;

        self.transport
            .declare_queue(
                &def.queue_name,
                def.durable,
                def.exclusive,
                def.auto_delete,
                &def.queue_arguments,
            )
            .await?;

        self.transport
            .bind_queue(&def.queue_name, &def.exchange_name, &def.routing_key)
            .await?;

        debug!(
            exchange = %def.exchange_name,
            queue = %def.queue_name,
            routing_key = %def.routing_key,
            "topology ensured"
        );

        Ok(())
    }
}
