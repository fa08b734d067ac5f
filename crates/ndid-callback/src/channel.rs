//! Per-node event channels.
//!
//! The [`CallbackHub`] fans incoming envelopes out to every sink subscribed
//! on the emitting node's channel, in subscription order. Subscriptions are
//! RAII handles: dropping one removes its sink, so a scenario that ends
//! (normally or by error) cannot leak listeners into the next one.
//!
//! Delivery is synchronous and happens outside the hub's lock, so a sink
//! may itself publish or subscribe without deadlocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use ndid_core::NodeId;

use crate::envelope::CallbackEnvelope;

/// Receives envelopes from the hub.
pub trait CallbackSink: Send + Sync {
    fn deliver(&self, envelope: &CallbackEnvelope);
}

impl<F> CallbackSink for F
where
    F: Fn(&CallbackEnvelope) + Send + Sync,
{
    fn deliver(&self, envelope: &CallbackEnvelope) {
        self(envelope)
    }
}

struct Listener {
    id: u64,
    sink: Arc<dyn CallbackSink>,
}

#[derive(Default)]
struct HubInner {
    channels: Mutex<HashMap<NodeId, Vec<Listener>>>,
    taps: Mutex<Vec<Listener>>,
    next_id: AtomicU64,
}

/// Shared event bus keyed by node id. Cheap to clone.
#[derive(Clone, Default)]
pub struct CallbackHub {
    inner: Arc<HubInner>,
}

/// Keeps one sink subscribed. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    hub: Weak<HubInner>,
    node_id: Option<NodeId>,
    id: u64,
}

impl CallbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `sink` to envelopes emitted by `node_id`.
    pub fn subscribe(&self, node_id: &NodeId, sink: Arc<dyn CallbackSink>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .channels
            .lock()
            .entry(node_id.clone())
            .or_default()
            .push(Listener { id, sink });
        tracing::trace!(node = %node_id, listener = id, "subscribed");
        Subscription {
            hub: Arc::downgrade(&self.inner),
            node_id: Some(node_id.clone()),
            id,
        }
    }

    /// Subscribe `sink` to every envelope on every channel.
    ///
    /// Used for recording a run; taps see envelopes before channel sinks.
    pub fn tap(&self, sink: Arc<dyn CallbackSink>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.taps.lock().push(Listener { id, sink });
        Subscription {
            hub: Arc::downgrade(&self.inner),
            node_id: None,
            id,
        }
    }

    /// Deliver `envelope` to the taps and to its node's channel.
    ///
    /// Returns how many channel sinks received it; zero means nobody was
    /// listening for that node.
    pub fn publish(&self, envelope: &CallbackEnvelope) -> usize {
        let taps: Vec<Arc<dyn CallbackSink>> =
            self.inner.taps.lock().iter().map(|l| l.sink.clone()).collect();
        let sinks: Vec<Arc<dyn CallbackSink>> = self
            .inner
            .channels
            .lock()
            .get(&envelope.node_id)
            .map(|ls| ls.iter().map(|l| l.sink.clone()).collect())
            .unwrap_or_default();

        for tap in &taps {
            tap.deliver(envelope);
        }
        if sinks.is_empty() {
            tracing::debug!(
                node = %envelope.node_id,
                kind = envelope.kind_label(),
                "callback on channel with no subscribers"
            );
        }
        for sink in &sinks {
            sink.deliver(envelope);
        }
        sinks.len()
    }

    /// Number of sinks on one channel.
    pub fn subscriber_count(&self, node_id: &NodeId) -> usize {
        self.inner
            .channels
            .lock()
            .get(node_id)
            .map_or(0, Vec::len)
    }

    /// Number of sinks across all channels (taps excluded).
    pub fn total_subscribers(&self) -> usize {
        self.inner.channels.lock().values().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for CallbackHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHub")
            .field("subscribers", &self.total_subscribers())
            .finish()
    }
}

impl Subscription {
    /// Channel this subscription listens on; `None` for taps.
    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.hub.upgrade() else {
            return;
        };
        match &self.node_id {
            Some(node_id) => {
                let mut channels = inner.channels.lock();
                if let Some(listeners) = channels.get_mut(node_id) {
                    listeners.retain(|l| l.id != self.id);
                    if listeners.is_empty() {
                        channels.remove(node_id);
                    }
                }
            }
            None => inner.taps.lock().retain(|l| l.id != self.id),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("node_id", &self.node_id)
            .field("id", &self.id)
            .finish()
    }
}
