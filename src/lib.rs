//! Embedded event-sourcing runtime.
//!
//! `streamfold` hosts **aggregates** -- individually addressable entities
//! whose state is derived solely from an ordered log of domain events -- and
//! delivers those events to **projections**, read models that fold the
//! stream into materialized state. Around that uniform programming model
//! (`handle` validates, `apply` folds) it provides the production machinery:
//! optimistic concurrency on an append-only store, per-aggregate command
//! serialization, snapshotting, inactivity-driven lifecycle, and an
//! at-least-once bus whose subscribers catch up from the store when they
//! have missed events.
//!
//! # Key Types
//!
//! | Type | Role |
//! |------|------|
//! | [`Aggregate`] | Domain model: handles commands, emits events, folds state |
//! | [`Runtime`] | Entry point: spawns instances on demand, dispatches commands |
//! | [`Projection`] | Read model fed by the bus and healed by the store |
//! | [`EventStore`] | Append-with-expected-version store contract |
//! | [`PubSub`] | Record broadcast contract |
//! | [`InMemoryStore`] / [`LocalPubSub`] | Reference adapters |
//! | [`EventRecord`] | Store-assigned envelope: stream + global versions |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use streamfold::{
//!     Aggregate, InMemoryStore, LocalPubSub, Runtime, DEFAULT_COMMAND_TIMEOUT,
//! };
//!
//! // 1. Define your aggregate.
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct Counter { value: u64 }
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! #[serde(tag = "type", content = "data")]
//! enum CounterEvent { Incremented }
//!
//! #[derive(Debug, thiserror::Error)]
//! enum CounterError {}
//!
//! impl Aggregate for Counter {
//!     const AGGREGATE_TYPE: &'static str = "counter";
//!     type Command = String;  // simplified for example
//!     type DomainEvent = CounterEvent;
//!     type Error = CounterError;
//!
//!     fn handle(&self, _cmd: String) -> Result<Vec<CounterEvent>, CounterError> {
//!         Ok(vec![CounterEvent::Incremented])
//!     }
//!     fn apply(mut self, _event: &CounterEvent) -> Self {
//!         self.value += 1;
//!         self
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! // 2. Build a runtime over the reference adapters and send commands.
//! let runtime = Runtime::builder()
//!     .store(Arc::new(InMemoryStore::new()))
//!     .pub_sub(Arc::new(LocalPubSub::new()))
//!     .build()?;
//!
//! runtime
//!     .command::<Counter>("counter-1", "go".into(), DEFAULT_COMMAND_TIMEOUT)
//!     .await?;
//!
//! let state = runtime.state::<Counter>("counter-1").await?;
//! assert_eq!(state.value, 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Consistency model
//!
//! Within one aggregate, the order of accepted commands, appended events,
//! and broadcast records is the same total order. Across aggregates only
//! the store's global version orders persisted records; the bus makes no
//! cross-publisher guarantee, so projections deduplicate and repair gaps
//! against the store. Delivery is at-least-once; projection application is
//! ordered and gap-free.

mod actor;
mod aggregate;
pub use aggregate::Aggregate;
mod config;
pub use config::{
    Config, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_SNAPSHOT_EVERY, Options, ShutdownTimeout,
};
mod error;
pub use error::{CommandError, StateError};
mod projection;
pub use projection::{Projection, ProjectionHandle, spawn_projection};
mod pubsub;
pub use pubsub::{LocalPubSub, PubSub, PublishError, RecordSink, SubscriptionId};
mod record;
pub use record::{
    AggregateRef, EventRecord, ExpectedVersion, ProposedEvent, StateSnapshot, Version,
    VersionRelation,
};
mod registry;
mod runtime;
pub use runtime::{BuildError, DEFAULT_COMMAND_TIMEOUT, Runtime, RuntimeBuilder};
mod store;
pub use store::{EventStore, InMemoryStore, StoreError};
