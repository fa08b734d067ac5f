//! Message-delivery fan-out tracking.
//!
//! When a node sends a message to several destinations, each destination
//! produces its own `message_queue_send_success` on the source node's
//! channel. The tracker registers one expectation per destination up front
//! and waits for all of them under a single deadline, reporting exactly
//! which destinations never confirmed.
//!
//! A destination listed twice expects two confirmations; they resolve in
//! arrival order.

use std::time::Duration;

use tokio::time::Instant;

use ndid_core::NodeId;

use crate::deferred::Deferred;
use crate::envelope::{Callback, CallbackEnvelope, CallbackKind};
use crate::error::{DeferredError, DeliveryError, RegistryError};
use crate::predicate::{Predicate, RequestKey};
use crate::registry::CorrelationRegistry;

/// One confirmed delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryConfirmation {
    pub destination: NodeId,
    pub ip: Option<String>,
    pub port: Option<u16>,
}

/// Outstanding delivery confirmations from one source node.
#[derive(Debug)]
pub struct MessageDeliveryTracker {
    source: NodeId,
    request: RequestKey,
    pending: Vec<(NodeId, Deferred<CallbackEnvelope>)>,
}

impl MessageDeliveryTracker {
    /// Register one expectation per destination.
    pub fn register(
        registry: &CorrelationRegistry,
        source: NodeId,
        request: impl Into<RequestKey>,
        destinations: impl IntoIterator<Item = NodeId>,
    ) -> Result<Self, RegistryError> {
        let mut tracker = Self {
            source,
            request: request.into(),
            pending: Vec::new(),
        };
        for destination in destinations {
            tracker.add_destination(registry, destination)?;
        }
        Ok(tracker)
    }

    /// Expect one more confirmation, for a destination learned late.
    pub fn add_destination(
        &mut self,
        registry: &CorrelationRegistry,
        destination: NodeId,
    ) -> Result<(), RegistryError> {
        let predicate = Predicate::on(self.source.clone(), CallbackKind::MessageQueueSendSuccess)
            .request(self.request.clone())
            .destination(destination.clone());
        let pending = registry.expect(predicate)?;
        self.pending.push((destination, pending));
        Ok(())
    }

    pub fn source(&self) -> &NodeId {
        &self.source
    }

    /// Destinations still expected, in registration order.
    pub fn destinations(&self) -> Vec<NodeId> {
        self.pending.iter().map(|(d, _)| d.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait until every destination confirmed, or `budget` elapsed.
    pub async fn wait_all(
        self,
        budget: Duration,
    ) -> Result<Vec<DeliveryConfirmation>, DeliveryError> {
        let deadline = Instant::now() + budget;
        let mut confirmed = Vec::with_capacity(self.pending.len());
        let mut remaining = self.pending.into_iter();

        while let Some((destination, pending)) = remaining.next() {
            match tokio::time::timeout_at(deadline, pending).await {
                Ok(Ok(envelope)) => {
                    confirmed.push(confirmation(&self.source, destination, &envelope)?);
                }
                Ok(Err(DeferredError::Abandoned | DeferredError::AlreadyResolved)) => {
                    return Err(DeliveryError::Abandoned {
                        source_node: self.source,
                    })
                }
                Err(_) => {
                    let mut missing = vec![destination];
                    for (destination, mut pending) in remaining {
                        match pending.try_take() {
                            Some(Ok(_)) => {}
                            _ => missing.push(destination),
                        }
                    }
                    tracing::warn!(source = %self.source, ?missing, ?budget, "message delivery incomplete");
                    return Err(DeliveryError::Incomplete {
                        source_node: self.source,
                        missing,
                        budget,
                    });
                }
            }
        }
        Ok(confirmed)
    }
}

fn confirmation(
    source: &NodeId,
    destination: NodeId,
    envelope: &CallbackEnvelope,
) -> Result<DeliveryConfirmation, DeliveryError> {
    match &envelope.callback {
        Callback::MessageQueueSendSuccess(m) => Ok(DeliveryConfirmation {
            destination,
            ip: m.destination_ip.clone(),
            port: m.destination_port,
        }),
        Callback::Other(opaque) => Err(DeliveryError::Malformed {
            source_node: source.clone(),
            destination,
            reason: opaque.decode_error.clone().unwrap_or_default(),
        }),
        _ => Ok(DeliveryConfirmation {
            destination,
            ip: None,
            port: None,
        }),
    }
}
