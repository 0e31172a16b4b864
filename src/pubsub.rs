//! Pub/sub contract and the process-local reference adapter.
//!
//! The bus is the latency path between aggregates and projections; the store
//! is the correctness path. Delivery is at-least-once with no cross-publisher
//! ordering, so subscribers deduplicate and repair gaps against the store.
//! The only order the bus must preserve is the intra-batch order of a single
//! [`broadcast`](PubSub::broadcast) call.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::record::EventRecord;

/// Channel end a subscriber hands to [`PubSub::subscribe`].
///
/// Each `broadcast` call arrives on the sink as one `Vec` batch, preserving
/// the order of records within that call.
pub type RecordSink = mpsc::UnboundedSender<Vec<EventRecord>>;

/// Opaque token identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Error returned when the bus cannot accept a broadcast at all.
///
/// Individual slow or dead subscribers are the adapter's problem (the local
/// adapter prunes them); this error means the transport itself refused the
/// records. Broadcast failure is logged by the publisher and never fatal:
/// subscribers self-heal by reading the store.
#[derive(Debug, Clone, thiserror::Error)]
#[error("pub/sub broadcast failed: {0}")]
pub struct PublishError(pub String);

/// Abstraction over the record broadcast bus.
pub trait PubSub: Send + Sync {
    /// Register a subscriber sink; returns a token for [`unsubscribe`](PubSub::unsubscribe).
    fn subscribe(&self, sink: RecordSink) -> SubscriptionId;

    /// Remove a subscription. Unknown tokens are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Deliver `records` to every current subscriber as one ordered batch.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the transport cannot accept the batch.
    fn broadcast(&self, records: &[EventRecord]) -> Result<(), PublishError>;
}

/// Process-local [`PubSub`] adapter: a mutex-guarded dispatch table of
/// subscriber sinks.
///
/// Subscribers whose receiving end has been dropped are pruned on the next
/// broadcast. `broadcast` itself never fails here; there is no transport to
/// fail.
#[derive(Default)]
pub struct LocalPubSub {
    subscribers: Mutex<HashMap<SubscriptionId, RecordSink>>,
}

impl LocalPubSub {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions. Diagnostic helper.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("pub/sub mutex poisoned")
            .len()
    }
}

impl PubSub for LocalPubSub {
    fn subscribe(&self, sink: RecordSink) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        self.subscribers
            .lock()
            .expect("pub/sub mutex poisoned")
            .insert(id, sink);
        tracing::debug!(subscription = %id, "subscriber registered");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let removed = self
            .subscribers
            .lock()
            .expect("pub/sub mutex poisoned")
            .remove(&id);
        if removed.is_some() {
            tracing::debug!(subscription = %id, "subscriber removed");
        }
    }

    fn broadcast(&self, records: &[EventRecord]) -> Result<(), PublishError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut subscribers = self.subscribers.lock().expect("pub/sub mutex poisoned");
        subscribers.retain(|id, sink| {
            if sink.send(records.to_vec()).is_ok() {
                true
            } else {
                // Receiver dropped without unsubscribing; prune.
                tracing::debug!(subscription = %id, "pruning dead subscriber");
                false
            }
        });
        Ok(())
    }
}
