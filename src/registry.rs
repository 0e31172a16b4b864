//! Process-wide map from `(aggregate_type, instance_id)` to live instance
//! handles.
//!
//! `Box<dyn Any + Send + Sync>` lets a single map hold `AggregateHandle<A>`
//! for any concrete `A`; downcasting recovers the typed handle. Lookup and
//! spawn are atomic: the spawn closure runs under the write lock (spawning
//! is cheap since hydration is deferred to the actor thread), so concurrent
//! dispatch can never create two actors for one aggregate.

use std::any::Any;
use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::actor::AggregateHandle;
use crate::aggregate::Aggregate;

/// One registered instance: the type-erased handle plus type-independent
/// liveness and teardown hooks.
struct Entry {
    handle: Box<dyn Any + Send + Sync>,
    alive: Box<dyn Fn() -> bool + Send + Sync>,
    terminate: Box<dyn Fn() + Send + Sync>,
}

/// Concurrent registry of live aggregate instances.
#[derive(Default)]
pub(crate) struct Registry {
    entries: RwLock<HashMap<(String, String), Entry>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Return the live handle for `(A::AGGREGATE_TYPE, instance_id)`,
    /// spawning one via `spawn` if the entry is missing or its actor has
    /// exited. Dead entries are evicted here, which is the supervisor's
    /// transient restart policy: crashed instances are resurrected lazily
    /// by the next command.
    pub(crate) async fn lookup_or_spawn<A, F>(
        &self,
        instance_id: &str,
        spawn: F,
    ) -> AggregateHandle<A>
    where
        A: Aggregate,
        F: FnOnce() -> AggregateHandle<A>,
    {
        let key = (A::AGGREGATE_TYPE.to_owned(), instance_id.to_owned());

        // Fast path: check with the read lock.
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key)
                && let Some(handle) = entry.handle.downcast_ref::<AggregateHandle<A>>()
                && handle.is_alive()
            {
                return handle.clone();
            }
        }

        // Slow path: re-check under the write lock (another task may have
        // spawned while we waited), then spawn and insert atomically.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(&key)
            && let Some(handle) = entry.handle.downcast_ref::<AggregateHandle<A>>()
            && handle.is_alive()
        {
            return handle.clone();
        }

        tracing::debug!(
            aggregate_type = A::AGGREGATE_TYPE,
            instance_id,
            "spawning instance"
        );
        let handle = spawn();
        let alive_probe = handle.clone();
        let terminate_probe = handle.clone();
        entries.insert(
            key,
            Entry {
                handle: Box::new(handle.clone()),
                alive: Box::new(move || alive_probe.is_alive()),
                terminate: Box::new(move || terminate_probe.terminate()),
            },
        );
        handle
    }

    /// Drop the entry for one instance, if present.
    pub(crate) async fn remove(&self, aggregate_type: &str, instance_id: &str) {
        let key = (aggregate_type.to_owned(), instance_id.to_owned());
        self.entries.write().await.remove(&key);
    }

    /// Ask every live instance to stop and clear the map. Clean teardown
    /// for runtime shutdown.
    pub(crate) async fn terminate_all(&self) {
        let mut entries = self.entries.write().await;
        for (key, entry) in entries.drain() {
            if (entry.alive)() {
                tracing::debug!(
                    aggregate_type = %key.0,
                    instance_id = %key.1,
                    "terminating instance"
                );
                (entry.terminate)();
            }
        }
    }

    /// Number of registered entries, live or not. Diagnostic helper.
    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
