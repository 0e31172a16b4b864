//! Read models that fold the event stream into derived state.
//!
//! A projection worker listens on two paths at once: the bus (latency) and
//! the store (correctness). Every bus delivery is classified against the
//! projection's cursor with the store's version comparator -- duplicates are
//! dropped, in-order records applied, and gaps repaired by re-reading the
//! store. The result is at-least-once delivery with ordered, gap-free
//! application.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::Options;
use crate::error::StateError;
use crate::pubsub::PubSub;
use crate::record::{EventRecord, Version, VersionRelation};
use crate::store::EventStore;

/// A read model built by folding event records.
///
/// # Contract
///
/// - [`apply`](Projection::apply) must be deterministic: the same record
///   sequence must produce the same state. The worker guarantees it is
///   called exactly once per record, in global order.
/// - [`init`](Projection::init) returns the starting state and the cursor to
///   resume from. The runtime does not persist the cursor across restarts;
///   a projection that wants durability loads its own checkpoint in `init`
///   and returns the checkpointed version, otherwise it returns
///   [`Version::ALL`] and replays everything.
pub trait Projection: Clone + Send + 'static {
    /// Name of this projection, used for config lookup and logging.
    const NAME: &'static str;

    /// Build the initial state and the global version to resume from.
    fn init(opts: &Options) -> (Self, Version);

    /// Fold one record into the state.
    fn apply(&mut self, record: &EventRecord);
}

/// Control messages from [`ProjectionHandle`] to the worker task.
enum ControlMessage<P> {
    GetState { reply: oneshot::Sender<P> },
    Stop,
}

/// Handle to a running projection worker.
pub struct ProjectionHandle<P: Projection> {
    control: mpsc::Sender<ControlMessage<P>>,
}

impl<P: Projection> Clone for ProjectionHandle<P> {
    fn clone(&self) -> Self {
        Self {
            control: self.control.clone(),
        }
    }
}

impl<P: Projection> ProjectionHandle<P> {
    /// Return a clone of the projection's current state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ActorGone`] if the worker has stopped or its
    /// `apply` panicked.
    pub async fn state(&self) -> Result<P, StateError> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(ControlMessage::GetState { reply: tx })
            .await
            .map_err(|_| StateError::ActorGone)?;
        rx.await.map_err(|_| StateError::ActorGone)
    }

    /// Stop the worker and drop its bus subscription.
    pub async fn stop(&self) {
        let _ = self.control.send(ControlMessage::Stop).await;
    }

    /// Whether the worker task is still running.
    pub fn is_alive(&self) -> bool {
        !self.control.is_closed()
    }
}

/// The state owned by one projection worker task.
struct ProjectionWorker<P: Projection> {
    store: Arc<dyn EventStore>,
    state: P,
    last_version: Version,
    /// Records seen on the bus that are still ahead of the cursor (only
    /// populated while the store is unreachable for gap repair).
    pending: BTreeMap<u64, EventRecord>,
}

impl<P: Projection> ProjectionWorker<P> {
    /// Fold `record` and advance the cursor.
    fn apply(&mut self, record: &EventRecord) {
        self.state.apply(record);
        self.last_version = record.global_version;
    }

    /// Read everything past the cursor from the store and fold it.
    fn catch_up(&mut self) -> Result<(), crate::store::StoreError> {
        let (_head, records) = self.store.fetch(self.last_version)?;
        if !records.is_empty() {
            tracing::debug!(
                projection = P::NAME,
                count = records.len(),
                from = self.last_version.0,
                "catching up from the store"
            );
            for record in &records {
                self.apply(record);
            }
        }
        self.drain_pending();
        Ok(())
    }

    /// Apply parked records that the cursor has reached; discard the ones
    /// it has passed.
    fn drain_pending(&mut self) {
        while let Some((&global, _)) = self.pending.first_key_value() {
            match self
                .store
                .compare_version(self.last_version, Version(global))
            {
                VersionRelation::Past | VersionRelation::Equal => {
                    self.pending.remove(&global);
                }
                VersionRelation::NextOne => {
                    let record = self
                        .pending
                        .remove(&global)
                        .expect("pending entry just observed");
                    self.apply(&record);
                }
                VersionRelation::Future => break,
            }
        }
    }

    /// Classify one bus-delivered record against the cursor and act on it.
    fn handle_record(&mut self, record: EventRecord) {
        match self
            .store
            .compare_version(self.last_version, record.global_version)
        {
            // Already applied: at-least-once delivery makes duplicates normal.
            VersionRelation::Past | VersionRelation::Equal => {}

            VersionRelation::NextOne => {
                self.apply(&record);
                self.drain_pending();
            }

            VersionRelation::Future => {
                // A gap: records between the cursor and this one are
                // missing. Repair from the store, then re-evaluate.
                match self.catch_up() {
                    Ok(()) => match self
                        .store
                        .compare_version(self.last_version, record.global_version)
                    {
                        VersionRelation::Past | VersionRelation::Equal => {}
                        VersionRelation::NextOne => {
                            self.apply(&record);
                            self.drain_pending();
                        }
                        VersionRelation::Future => {
                            // The store has not caught up to this record
                            // either; park it.
                            self.pending.insert(record.global_version.0, record);
                        }
                    },
                    Err(e) => {
                        tracing::warn!(
                            projection = P::NAME,
                            error = %e,
                            "gap repair failed; parking record until the store recovers"
                        );
                        self.pending.insert(record.global_version.0, record);
                    }
                }
            }
        }
    }
}

/// Worker task body: initial catch-up, then the two-channel event loop.
async fn run_worker<P: Projection>(
    mut worker: ProjectionWorker<P>,
    mut bus_rx: mpsc::UnboundedReceiver<Vec<EventRecord>>,
    mut control_rx: mpsc::Receiver<ControlMessage<P>>,
) {
    // Catch up from the store before draining the bus. Deliveries arriving
    // meanwhile buffer in the subscription channel and pass through the
    // comparator below, which drops whatever the catch-up already covered.
    if let Err(e) = worker.catch_up() {
        tracing::warn!(
            projection = P::NAME,
            error = %e,
            "initial catch-up failed; relying on bus deliveries to trigger repair"
        );
    }

    loop {
        tokio::select! {
            ctrl = control_rx.recv() => match ctrl {
                Some(ControlMessage::GetState { reply }) => {
                    let _ = reply.send(worker.state.clone());
                }
                Some(ControlMessage::Stop) | None => break,
            },
            batch = bus_rx.recv() => match batch {
                Some(records) => {
                    for record in records {
                        worker.handle_record(record);
                    }
                }
                // Bus adapter dropped our sink: nothing more will arrive.
                None => break,
            },
        }
    }
    tracing::debug!(projection = P::NAME, "projection worker stopped");
}

/// Subscribe to the bus and start a projection worker task.
///
/// Used by [`Runtime::start_projection`](crate::Runtime::start_projection);
/// exposed for wiring a projection to adapters directly (e.g. in tests).
/// Must be called from within a tokio runtime.
pub fn spawn_projection<P: Projection>(
    store: Arc<dyn EventStore>,
    pub_sub: Arc<dyn PubSub>,
    opts: &Options,
) -> ProjectionHandle<P> {
    let (bus_tx, bus_rx) = mpsc::unbounded_channel();
    let subscription = pub_sub.subscribe(bus_tx);

    let (control_tx, control_rx) = mpsc::channel(8);

    let (state, last_version) = P::init(opts);
    tracing::debug!(
        projection = P::NAME,
        from = last_version.0,
        "projection starting"
    );
    let worker = ProjectionWorker {
        store,
        state,
        last_version,
        pending: BTreeMap::new(),
    };

    tokio::spawn(async move {
        run_worker(worker, bus_rx, control_rx).await;
        // Not reached if `apply` panics; the bus adapter prunes the dead
        // sink on its next broadcast instead.
        pub_sub.unsubscribe(subscription);
    });

    ProjectionHandle {
        control: control_tx,
    }
}
