//! Property-based tests for the runtime's universal guarantees: replay
//! determinism, snapshot equivalence, and per-stream ordering.

mod common;

use std::sync::Arc;

use proptest::prelude::*;
use streamfold::{
    Aggregate, AggregateRef, DEFAULT_COMMAND_TIMEOUT, EventStore, InMemoryStore, LocalPubSub,
    Options, Runtime, Version,
};

use common::{Counter, CounterCommand, CounterEvent};

fn runtime_over(store: Arc<InMemoryStore>, snapshot_every: Option<u64>) -> Runtime {
    let mut builder = Runtime::builder()
        .store(store)
        .pub_sub(Arc::new(LocalPubSub::new()));
    if let Some(every) = snapshot_every {
        builder = builder.module("counter", Options::new().snapshot_every(every));
    }
    builder.build().expect("build should succeed")
}

/// Run `commands` against a fresh counter instance, ignoring rejections the
/// way a caller would, and return the final state.
async fn drive(runtime: &Runtime, id: &str, commands: &[CounterCommand]) -> Counter {
    for cmd in commands {
        let _ = runtime
            .command::<Counter>(id, cmd.clone(), DEFAULT_COMMAND_TIMEOUT)
            .await;
    }
    runtime
        .state::<Counter>(id)
        .await
        .expect("state should succeed")
}

/// Fold the persisted stream by hand, mirroring what hydration does.
fn fold_stream(store: &InMemoryStore, id: &str) -> Counter {
    let records = store
        .fetch_by_aggregate(&AggregateRef::new("counter", id), Version::ALL)
        .expect("fetch should succeed");
    records.iter().fold(Counter::default(), |state, record| {
        let tagged = if record.payload.is_null() {
            serde_json::json!({"type": record.event_type})
        } else {
            serde_json::json!({"type": record.event_type, "data": record.payload})
        };
        match serde_json::from_value::<CounterEvent>(tagged) {
            Ok(event) => state.apply(&event),
            Err(_) => state,
        }
    })
}

fn command_sequence() -> impl Strategy<Value = Vec<CounterCommand>> {
    // A mix of valid and invalid commands: creates may duplicate and
    // increments may precede the create; rejections must not disturb state.
    let cmd = prop_oneof![
        2 => (1u64..100).prop_map(|id| CounterCommand::Create { id }),
        8 => (0u64..1000).prop_map(|amount| CounterCommand::Increment { amount }),
    ];
    proptest::collection::vec(cmd, 1..24)
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .expect("failed to build test runtime")
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

    /// The state an aggregate reports equals the fold of its persisted
    /// stream, for any command sequence.
    #[test]
    fn replay_determinism(commands in command_sequence()) {
        let store = Arc::new(InMemoryStore::new());
        let runtime = runtime_over(store.clone(), None);

        let live = block_on(drive(&runtime, "p-1", &commands));
        let replayed = fold_stream(&store, "p-1");

        prop_assert_eq!(live, replayed);
    }

    /// Hydrating via snapshots yields the same state as replaying the full
    /// stream with no snapshots, for any cadence.
    #[test]
    fn snapshot_equivalence(
        commands in command_sequence(),
        snapshot_every in 1u64..8,
    ) {
        let with_snapshots = Arc::new(InMemoryStore::new());
        let without_snapshots = Arc::new(InMemoryStore::new());

        let (snapshotted, plain) = block_on(async {
            let runtime = runtime_over(with_snapshots.clone(), Some(snapshot_every));
            drive(&runtime, "p-1", &commands).await;
            runtime.shutdown().await;

            // A fresh runtime over the same store hydrates from whatever
            // snapshot the cadence left behind, plus the tail of the stream.
            let rehydrated = runtime_over(with_snapshots.clone(), Some(snapshot_every));
            let snapshotted = rehydrated
                .state::<Counter>("p-1")
                .await
                .expect("state should succeed");

            let baseline = runtime_over(without_snapshots.clone(), None);
            let plain = drive(&baseline, "p-1", &commands).await;

            (snapshotted, plain)
        });

        prop_assert_eq!(snapshotted, plain);
    }

    /// Stream versions of any stream are strictly increasing and contiguous
    /// starting at 1; global versions are strictly increasing.
    #[test]
    fn per_stream_ordering(commands in command_sequence()) {
        let store = Arc::new(InMemoryStore::new());
        let runtime = runtime_over(store.clone(), None);

        block_on(drive(&runtime, "p-1", &commands));

        let records = store
            .fetch_by_aggregate(&AggregateRef::new("counter", "p-1"), Version::ALL)
            .expect("fetch should succeed");
        for (i, record) in records.iter().enumerate() {
            prop_assert_eq!(record.stream_version, Version(i as u64 + 1));
        }

        let (_, global) = store.fetch(Version::ALL).expect("fetch should succeed");
        for pair in global.windows(2) {
            prop_assert!(pair[0].global_version < pair[1].global_version);
        }
    }
}
