//! Actor loop that owns one aggregate instance and serializes its commands.
//!
//! Each instance runs on a dedicated thread and processes messages from an
//! `mpsc` channel one at a time: at most one command is in flight per
//! aggregate, and concurrent callers queue FIFO at the channel. The actor
//! hydrates lazily from snapshot + replay on the first message, appends with
//! an expected version, publishes the resulting records, and maintains the
//! snapshot cadence. Inactivity shuts the instance down; the registry
//! re-spawns it on the next command.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::aggregate::{Aggregate, encode_event, fold_records};
use crate::config::ResolvedOptions;
use crate::error::{CommandError, StateError};
use crate::pubsub::PubSub;
use crate::record::{AggregateRef, ExpectedVersion, StateSnapshot, Version};
use crate::store::{EventStore, StoreError};

/// Command queue depth per instance; callers past this apply backpressure.
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Result type sent back through the `Execute` reply channel.
type ExecuteResult<A> =
    Result<Vec<<A as Aggregate>::DomainEvent>, CommandError<<A as Aggregate>::Error>>;

/// Messages sent from [`AggregateHandle`] to the actor loop.
pub(crate) enum ActorMessage<A: Aggregate> {
    /// Execute a command against the aggregate.
    Execute {
        cmd: A::Command,
        reply: oneshot::Sender<ExecuteResult<A>>,
    },

    /// Retrieve the current aggregate state (hydrating first if needed).
    GetState {
        reply: oneshot::Sender<Result<A, StateError>>,
    },

    /// Gracefully shut down the actor loop.
    Shutdown,
}

/// Hydrated aggregate state plus the stream version it reflects.
struct Hydrated<A> {
    state: A,
    version: Version,
}

/// The state owned by one actor thread.
struct AggregateActor<A: Aggregate> {
    aggregate_ref: AggregateRef,
    store: Arc<dyn EventStore>,
    pub_sub: Arc<dyn PubSub>,
    options: ResolvedOptions,
    /// `None` until the first message triggers hydration.
    hydrated: Option<Hydrated<A>>,
    /// Events appended since this instance was born; drives snapshot cadence.
    events_appended: u64,
    /// Snapshot blocks already written (`events_appended / snapshot_every`).
    snapshot_blocks_done: u64,
}

impl<A: Aggregate> AggregateActor<A> {
    /// Load state on first use: snapshot if present, then replay of every
    /// record past the snapshot version.
    ///
    /// A snapshot that fails to deserialize is treated as a cache miss and
    /// the full stream is replayed.
    fn ensure_hydrated(&mut self) -> Result<(A, Version), StoreError> {
        if let Some(h) = &self.hydrated {
            return Ok((h.state.clone(), h.version));
        }

        let mut state = A::default();
        let mut version = Version::ALL;

        if let Some(snapshot) = self.store.load_snapshot(&self.aggregate_ref)? {
            match serde_json::from_value::<A>(snapshot.state) {
                Ok(s) => {
                    state = s;
                    version = snapshot.version;
                }
                Err(e) => {
                    tracing::warn!(
                        aggregate = %self.aggregate_ref,
                        error = %e,
                        "failed to deserialize snapshot; replaying the full stream"
                    );
                }
            }
        }

        let records = self.store.fetch_by_aggregate(&self.aggregate_ref, version)?;
        if let Some(last) = records.last() {
            version = last.stream_version;
        }
        state = fold_records::<A>(state, &records);

        tracing::debug!(
            aggregate = %self.aggregate_ref,
            version = version.0,
            replayed = records.len(),
            "hydrated"
        );

        self.hydrated = Some(Hydrated {
            state: state.clone(),
            version,
        });
        Ok((state, version))
    }

    /// Execute a single command. The boolean is `true` when the failure is
    /// fatal to the instance (append conflict) and the loop must exit after
    /// replying.
    fn execute(&mut self, cmd: A::Command) -> (ExecuteResult<A>, bool) {
        // 1. Hydrate (first message only). Failure is returned to this
        //    caller and retried by the next message.
        let (state, version) = match self.ensure_hydrated() {
            Ok(loaded) => loaded,
            Err(e) => return (Err(e.into()), false),
        };

        // 2. Decide: run the command handler against current state.
        let domain_events = match state.handle(cmd) {
            Ok(events) => events,
            Err(e) => return (Err(CommandError::Rejected(e)), false),
        };

        // 3. No-op commands produce no events.
        if domain_events.is_empty() {
            return (Ok(domain_events), false);
        }

        // 4. Fold the produced events into the next state.
        let new_state = domain_events
            .iter()
            .fold(state.clone(), |state, event| state.apply(event));

        // 5. Append with the expected version. The first append of a stream
        //    uses NoStream; every later append uses the last known head.
        let mut proposed = Vec::with_capacity(domain_events.len());
        for event in &domain_events {
            match encode_event::<A>(event) {
                Ok(p) => proposed.push(p),
                Err(e) => return (Err(CommandError::Encoding(e)), false),
            }
        }
        let expected = if version == Version::ALL {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(version)
        };
        let (head, records) = match self.store.append(&self.aggregate_ref, proposed, expected) {
            Ok(appended) => appended,
            Err(e @ StoreError::WrongVersion { .. }) => {
                // Another writer exists for this stream, which the
                // single-writer model forbids. The instance dies; the next
                // command rebuilds from the store, the ground truth.
                tracing::error!(
                    aggregate = %self.aggregate_ref,
                    error = %e,
                    "append conflict, instance shutting down"
                );
                return (Err(CommandError::Conflict), true);
            }
            Err(e) => return (Err(e.into()), false),
        };

        self.hydrated = Some(Hydrated {
            state: new_state,
            version: head,
        });
        self.events_appended += records.len() as u64;

        tracing::info!(
            aggregate = %self.aggregate_ref,
            count = records.len(),
            version = head.0,
            "events appended"
        );

        // 6. Publish. The store is the system of record; a bus failure is
        //    logged and projections catch up from the store.
        if let Err(e) = self.pub_sub.broadcast(&records) {
            tracing::warn!(
                aggregate = %self.aggregate_ref,
                error = %e,
                "broadcast failed; projections will catch up from the store"
            );
        }

        // 7. Snapshot cadence.
        self.maybe_snapshot();

        (Ok(domain_events), false)
    }

    /// Write a snapshot whenever `events_appended` crosses into a new
    /// `snapshot_every` block. A failed write is retried at the next
    /// boundary check.
    fn maybe_snapshot(&mut self) {
        let blocks = self.events_appended / self.options.snapshot_every;
        if blocks > self.snapshot_blocks_done && self.write_snapshot() {
            self.snapshot_blocks_done = blocks;
        }
    }

    /// Persist the current state at the current version. Returns `false`
    /// (after logging) on serialization or store failure; snapshots are an
    /// optimization and never fail the command.
    fn write_snapshot(&self) -> bool {
        let Some(h) = &self.hydrated else {
            return false;
        };
        let state = match serde_json::to_value(&h.state) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    aggregate = %self.aggregate_ref,
                    error = %e,
                    "failed to serialize state for snapshot"
                );
                return false;
            }
        };
        let snapshot = StateSnapshot {
            version: h.version,
            state,
        };
        match self.store.record_snapshot(&self.aggregate_ref, snapshot) {
            Ok(()) => {
                tracing::debug!(
                    aggregate = %self.aggregate_ref,
                    version = h.version.0,
                    "snapshot recorded"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    aggregate = %self.aggregate_ref,
                    error = %e,
                    "failed to record snapshot"
                );
                false
            }
        }
    }

    /// Hook run when the instance stops cleanly (idle expiry or teardown).
    fn on_shutdown(&self) {
        if self.options.snapshot_on_shutdown
            && let Some(h) = &self.hydrated
            && h.version != Version::ALL
        {
            self.write_snapshot();
        }
    }
}

/// Runs the aggregate actor loop on its dedicated thread.
///
/// The loop exits when the channel closes (all senders dropped), a
/// `Shutdown` message arrives, the idle timer fires, or an append conflict
/// makes the instance unsalvageable.
fn run_actor<A: Aggregate>(mut actor: AggregateActor<A>, mut rx: mpsc::Receiver<ActorMessage<A>>) {
    // Build a lightweight current-thread runtime with time enabled. The
    // actor needs `tokio::time::timeout` to implement idle shutdown, but
    // the parent runtime may be current-thread (common in tests), which
    // doesn't drive timers from non-runtime threads. A dedicated minimal
    // runtime avoids that constraint and keeps the actor self-contained.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to create actor timer runtime");

    loop {
        // Create the timeout future INSIDE `block_on` so that the `Sleep`
        // timer registers with the local runtime's time driver.
        let idle_timeout = actor.options.shutdown_timeout.as_duration();
        let msg = rt.block_on(async { tokio::time::timeout(idle_timeout, rx.recv()).await });

        match msg {
            // Received a message before the timeout elapsed.
            Ok(Some(msg)) => match msg {
                ActorMessage::Execute { cmd, reply } => {
                    let _span =
                        tracing::info_span!("command", aggregate = %actor.aggregate_ref).entered();
                    let (result, fatal) = actor.execute(cmd);
                    // If the receiver was dropped, the caller no longer
                    // cares about the result. Silently discard it.
                    let _ = reply.send(result);
                    if fatal {
                        return;
                    }
                }

                ActorMessage::GetState { reply } => {
                    let result = actor
                        .ensure_hydrated()
                        .map(|(state, _)| state)
                        .map_err(StateError::from);
                    let _ = reply.send(result);
                }

                ActorMessage::Shutdown => break,
            },
            // Channel closed: all senders dropped.
            Ok(None) => break,
            // Idle timeout elapsed with no messages.
            Err(_elapsed) => {
                tracing::info!(aggregate = %actor.aggregate_ref, "instance idle, shutting down");
                break;
            }
        }
    }
    actor.on_shutdown();
}

/// Handle to a running aggregate actor.
///
/// Lightweight, cloneable, and `Send + Sync`. Communicates with the actor
/// thread over a bounded channel; the channel doubles as the per-aggregate
/// command queue.
#[derive(Debug)]
pub(crate) struct AggregateHandle<A: Aggregate> {
    sender: mpsc::Sender<ActorMessage<A>>,
}

// Manual `Clone` because `A` itself need not be `Clone` for the handle --
// only the `Sender` is cloned.
impl<A: Aggregate> Clone for AggregateHandle<A> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<A: Aggregate> AggregateHandle<A> {
    /// Send a command and wait for the result. Queues behind any commands
    /// already in flight on this instance.
    #[cfg(test)]
    pub(crate) async fn execute(&self, cmd: A::Command) -> ExecuteResult<A> {
        match self.try_execute(cmd).await {
            Ok(result) => result,
            Err(_cmd) => Err(CommandError::ActorGone),
        }
    }

    /// Like [`execute`](Self::execute), but hands the command back when the
    /// actor exited before accepting it. That case is safe for the caller
    /// to retry on a fresh instance; an accepted command is not (its append
    /// may have happened before the actor died) and maps to
    /// [`CommandError::ActorGone`].
    pub(crate) async fn try_execute(&self, cmd: A::Command) -> Result<ExecuteResult<A>, A::Command> {
        let (tx, rx) = oneshot::channel();
        if let Err(rejected) = self
            .sender
            .send(ActorMessage::Execute { cmd, reply: tx })
            .await
        {
            let ActorMessage::Execute { cmd, .. } = rejected.0 else {
                unreachable!("the message sent above is Execute");
            };
            return Err(cmd);
        }
        Ok(rx.await.unwrap_or(Err(CommandError::ActorGone)))
    }

    /// Read the current aggregate state, hydrating the instance if needed.
    pub(crate) async fn get_state(&self) -> Result<A, StateError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ActorMessage::GetState { reply: tx })
            .await
            .map_err(|_| StateError::ActorGone)?;
        rx.await.map_err(|_| StateError::ActorGone)?
    }

    /// Whether the actor backing this handle is still running. The registry
    /// uses this to evict stale entries and re-spawn on the next command.
    pub(crate) fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Ask the actor to stop after draining already-queued messages.
    pub(crate) fn terminate(&self) {
        let _ = self.sender.try_send(ActorMessage::Shutdown);
    }
}

/// Spawn an aggregate actor for `aggregate_ref` on a dedicated thread.
///
/// Hydration is deferred to the actor's first message, so spawning is cheap
/// and safe to do under the registry lock.
pub(crate) fn spawn_actor<A: Aggregate>(
    store: Arc<dyn EventStore>,
    pub_sub: Arc<dyn PubSub>,
    aggregate_ref: AggregateRef,
    options: ResolvedOptions,
) -> AggregateHandle<A> {
    let (tx, rx) = mpsc::channel::<ActorMessage<A>>(COMMAND_QUEUE_DEPTH);
    let actor = AggregateActor::<A> {
        aggregate_ref,
        store,
        pub_sub,
        options,
        hydrated: None,
        events_appended: 0,
        snapshot_blocks_done: 0,
    };

    std::thread::spawn(move || {
        run_actor(actor, rx);
    });

    AggregateHandle { sender: tx }
}
