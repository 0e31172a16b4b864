//! Top-level entry point that composes the store, the bus, the registry,
//! and configuration into a single `Runtime` type.
//!
//! The runtime owns the lifecycle of aggregate instances: commands spawn
//! them on demand through the registry, crashed or idled-out instances are
//! resurrected lazily by the next command (transient restart -- the store is
//! the ground truth and re-derives their state), and `shutdown` tears all of
//! them down cleanly.

use std::sync::Arc;
use std::time::Duration;

use crate::actor::spawn_actor;
use crate::aggregate::Aggregate;
use crate::config::{Config, Options};
use crate::error::{CommandError, StateError};
use crate::projection::{Projection, ProjectionHandle, spawn_projection};
use crate::pubsub::PubSub;
use crate::record::AggregateRef;
use crate::registry::Registry;
use crate::store::EventStore;

/// Default time a caller waits for a command before giving up: 5 seconds.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Error returned by [`RuntimeBuilder::build`] when required adapters are
/// missing.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// No event store adapter was configured.
    #[error("no event store adapter configured")]
    MissingStore,

    /// No pub/sub adapter was configured.
    #[error("no pub/sub adapter configured")]
    MissingPubSub,
}

/// The event-sourcing runtime: aggregate hosting, command dispatch, and
/// projection startup over one store and one bus.
///
/// `Clone + Send + Sync` -- cloning shares the underlying registry and
/// adapters.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use streamfold::{InMemoryStore, LocalPubSub, Runtime};
///
/// # fn example() -> Result<(), streamfold::BuildError> {
/// let runtime = Runtime::builder()
///     .store(Arc::new(InMemoryStore::new()))
///     .pub_sub(Arc::new(LocalPubSub::new()))
///     .build()?;
/// // runtime.command::<MyAggregate>("id-1", cmd, DEFAULT_COMMAND_TIMEOUT)
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Runtime {
    store: Arc<dyn EventStore>,
    pub_sub: Arc<dyn PubSub>,
    registry: Arc<Registry>,
    config: Arc<Config>,
}

// Manual `Debug` because the adapters are trait objects.
impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}

impl Runtime {
    /// Create a builder for configuring adapters and options.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder {
            store: None,
            pub_sub: None,
            config: Config::default(),
        }
    }

    /// Deliver `cmd` to the `(A::AGGREGATE_TYPE, id)` aggregate, spawning
    /// its instance if needed, and wait up to `timeout` for the result.
    ///
    /// Commands are serialized per aggregate: at most one is in flight per
    /// instance and concurrent callers queue FIFO. Returns the domain
    /// events the command produced.
    ///
    /// # Errors
    ///
    /// * [`CommandError::Rejected`] -- the aggregate's handler rejected the
    ///   command; the instance stays live.
    /// * [`CommandError::Conflict`] -- the optimistic append failed; the
    ///   instance is replaced and the next command re-hydrates.
    /// * [`CommandError::Store`] -- the store failed; retrying is the
    ///   caller's call.
    /// * [`CommandError::Timeout`] -- `timeout` elapsed. The in-flight
    ///   command is **not** cancelled; the aggregate completes it.
    /// * [`CommandError::ActorGone`] -- the instance exited mid-command.
    pub async fn command<A: Aggregate>(
        &self,
        id: &str,
        cmd: A::Command,
        timeout: Duration,
    ) -> Result<Vec<A::DomainEvent>, CommandError<A::Error>> {
        match tokio::time::timeout(timeout, self.dispatch::<A>(id, cmd)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(CommandError::Timeout),
        }
    }

    /// Command dispatch without the caller timeout: lookup-or-spawn, send,
    /// await the reply.
    async fn dispatch<A: Aggregate>(
        &self,
        id: &str,
        cmd: A::Command,
    ) -> Result<Vec<A::DomainEvent>, CommandError<A::Error>> {
        let mut cmd = cmd;
        // One bounded retry covers the race where the instance idles out
        // between lookup and send. A command the actor *accepted* is never
        // retried: it may have been appended before the actor died.
        for attempt in 0..2 {
            let handle = self
                .registry
                .lookup_or_spawn::<A, _>(id, || {
                    spawn_actor::<A>(
                        self.store.clone(),
                        self.pub_sub.clone(),
                        AggregateRef::new(A::AGGREGATE_TYPE, id),
                        self.config.resolve(A::AGGREGATE_TYPE, None),
                    )
                })
                .await;

            match handle.try_execute(cmd).await {
                Ok(result) => {
                    if matches!(result, Err(CommandError::Conflict)) {
                        // The instance died on the conflict; deregister it
                        // eagerly instead of waiting for the next lookup.
                        self.registry.remove(A::AGGREGATE_TYPE, id).await;
                    }
                    return result;
                }
                Err(returned) => {
                    tracing::debug!(
                        aggregate_type = A::AGGREGATE_TYPE,
                        instance_id = id,
                        attempt,
                        "instance exited before accepting the command, retrying"
                    );
                    cmd = returned;
                }
            }
        }
        Err(CommandError::ActorGone)
    }

    /// Read the current state of the `(A::AGGREGATE_TYPE, id)` aggregate.
    ///
    /// Debug-oriented: goes through the same serialization lane as
    /// commands, so it observes a consistent point in the stream. Spawns
    /// and hydrates the instance if it is not live.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if hydration fails or the instance exits.
    pub async fn state<A: Aggregate>(&self, id: &str) -> Result<A, StateError> {
        let handle = self
            .registry
            .lookup_or_spawn::<A, _>(id, || {
                spawn_actor::<A>(
                    self.store.clone(),
                    self.pub_sub.clone(),
                    AggregateRef::new(A::AGGREGATE_TYPE, id),
                    self.config.resolve(A::AGGREGATE_TYPE, None),
                )
            })
            .await;
        handle.get_state().await
    }

    /// Start a projection worker subscribed to this runtime's bus, using
    /// the options configured for `P::NAME`.
    pub fn start_projection<P: Projection>(&self) -> ProjectionHandle<P> {
        let opts = self.config.merged(P::NAME, None);
        spawn_projection::<P>(self.store.clone(), self.pub_sub.clone(), &opts)
    }

    /// Start a projection worker with explicit options, which take
    /// precedence over the configured ones.
    pub fn start_projection_with<P: Projection>(&self, opts: Options) -> ProjectionHandle<P> {
        let merged = self.config.merged(P::NAME, Some(&opts));
        spawn_projection::<P>(self.store.clone(), self.pub_sub.clone(), &merged)
    }

    /// Ask every live aggregate instance to stop and clear the registry.
    ///
    /// Instances drain their already-queued commands first. Projections
    /// started from this runtime are stopped through their own handles.
    pub async fn shutdown(&self) {
        tracing::info!("runtime shutting down");
        self.registry.terminate_all().await;
    }

    /// The store this runtime is bound to.
    #[must_use]
    pub fn store(&self) -> Arc<dyn EventStore> {
        self.store.clone()
    }

    /// The bus this runtime is bound to.
    #[must_use]
    pub fn pub_sub(&self) -> Arc<dyn PubSub> {
        self.pub_sub.clone()
    }
}

/// Builder for a [`Runtime`].
///
/// The store and bus adapters are required; per-module options are not.
pub struct RuntimeBuilder {
    store: Option<Arc<dyn EventStore>>,
    pub_sub: Option<Arc<dyn PubSub>>,
    config: Config,
}

impl RuntimeBuilder {
    /// Bind the runtime to an event store adapter.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Bind the runtime to a pub/sub adapter.
    #[must_use]
    pub fn pub_sub(mut self, pub_sub: Arc<dyn PubSub>) -> Self {
        self.pub_sub = Some(pub_sub);
        self
    }

    /// Set runtime-wide default options for every module.
    #[must_use]
    pub fn defaults(mut self, options: Options) -> Self {
        self.config.set_defaults(options);
        self
    }

    /// Set option overrides for one module (an aggregate type name or a
    /// projection name).
    #[must_use]
    pub fn module(mut self, name: impl Into<String>, options: Options) -> Self {
        self.config.set_module(name, options);
        self
    }

    /// Build the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] if the store or bus adapter is missing.
    pub fn build(self) -> Result<Runtime, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let pub_sub = self.pub_sub.ok_or(BuildError::MissingPubSub)?;
        Ok(Runtime {
            store,
            pub_sub,
            registry: Arc::new(Registry::new()),
            config: Arc::new(self.config),
        })
    }
}
