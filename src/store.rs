//! Store contract and the in-memory reference adapter.
//!
//! The runtime binds to one [`EventStore`] per process (via
//! [`RuntimeBuilder::store`](crate::RuntimeBuilder::store)) and treats it as
//! the system of record: appends are atomic, versions are assigned and
//! durable before the success reply, and history is never rewritten.
//! [`InMemoryStore`] is the reference implementation used for tests and
//! embedded deployments; durable back-ends implement the same trait.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::record::{
    AggregateRef, EventRecord, ExpectedVersion, ProposedEvent, StateSnapshot, Version,
    VersionRelation,
};

/// Error returned by store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The expected-version check failed: another writer moved the stream.
    #[error("wrong expected version on {aggregate_ref}: expected {expected}, stream at {actual}")]
    WrongVersion {
        /// The stream whose check failed.
        aggregate_ref: AggregateRef,
        /// What the caller assumed.
        expected: ExpectedVersion,
        /// The stream's actual head.
        actual: Version,
    },

    /// Transient I/O failure; the operation may succeed if retried.
    #[error("event store unavailable: {0}")]
    Unavailable(String),
}

/// Abstraction over the append-only event store.
///
/// Implementations must be safe for concurrent use and must guarantee that
/// one `append` is a single transaction: the assigned stream and global
/// versions are contiguous and finalized before the success reply, and
/// readers observe either all or none of an append's records.
pub trait EventStore: Send + Sync {
    /// Atomically append `events` to the stream named by `aggregate_ref`.
    ///
    /// The `expected` argument carries the caller's assumption about the
    /// stream head; see [`ExpectedVersion`]. On success, returns the new
    /// stream head and the fully-assigned records in append order.
    ///
    /// # Errors
    ///
    /// * [`StoreError::WrongVersion`] when the expected-version check fails.
    /// * [`StoreError::Unavailable`] on transient I/O faults.
    fn append(
        &self,
        aggregate_ref: &AggregateRef,
        events: Vec<ProposedEvent>,
        expected: ExpectedVersion,
    ) -> Result<(Version, Vec<EventRecord>), StoreError>;

    /// Read all records with `global_version > after`, in global order.
    ///
    /// `after = Version::ALL` reads everything. Also returns the store's
    /// current global head so callers can advance their cursor even when no
    /// records were returned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on transient I/O faults.
    fn fetch(&self, after: Version) -> Result<(Version, Vec<EventRecord>), StoreError>;

    /// Read one stream's records with `stream_version > after`, in stream
    /// order. The record at `after` itself is excluded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on transient I/O faults.
    fn fetch_by_aggregate(
        &self,
        aggregate_ref: &AggregateRef,
        after: Version,
    ) -> Result<Vec<EventRecord>, StoreError>;

    /// Overwrite the single snapshot kept for `aggregate_ref`.
    ///
    /// Idempotent for an equal snapshot; the latest write wins.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on transient I/O faults.
    fn record_snapshot(
        &self,
        aggregate_ref: &AggregateRef,
        snapshot: StateSnapshot,
    ) -> Result<(), StoreError>;

    /// Read the snapshot for `aggregate_ref`, if one has been recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on transient I/O faults.
    fn load_snapshot(
        &self,
        aggregate_ref: &AggregateRef,
    ) -> Result<Option<StateSnapshot>, StoreError>;

    /// Classify `b` relative to a cursor `a`.
    ///
    /// This is the projection gap detector: `Past`/`Equal` mean `b` was
    /// already applied, `NextOne` means `b` is the next record to apply, and
    /// `Future` means records between `a` and `b` are missing.
    fn compare_version(&self, a: Version, b: Version) -> VersionRelation {
        if b < a {
            VersionRelation::Past
        } else if b == a {
            VersionRelation::Equal
        } else if b == a.next() {
            VersionRelation::NextOne
        } else {
            VersionRelation::Future
        }
    }
}

/// Streams, the global log, and snapshots behind the [`InMemoryStore`] mutex.
#[derive(Default)]
struct StoreInner {
    streams: HashMap<AggregateRef, Vec<EventRecord>>,
    global: Vec<EventRecord>,
    snapshots: HashMap<AggregateRef, StateSnapshot>,
}

/// In-memory reference implementation of [`EventStore`].
///
/// A single mutex guards the streams, the global log, and the snapshot
/// table, so an append is one critical section and readers always see whole
/// appends. Versions are dense integers: stream versions start at 1 per
/// stream, global versions at 1 across the store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// List every stream that has at least one record, sorted by aggregate
    /// type then instance id. Diagnostic helper; not part of the
    /// [`EventStore`] contract.
    pub fn stream_names(&self) -> Vec<AggregateRef> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut names: Vec<AggregateRef> = inner
            .streams
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(aref, _)| aref.clone())
            .collect();
        names.sort_by(|a, b| {
            (a.aggregate_type.as_str(), a.instance_id.as_str())
                .cmp(&(b.aggregate_type.as_str(), b.instance_id.as_str()))
        });
        names
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

/// Current wall-clock time as Unix epoch milliseconds.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl EventStore for InMemoryStore {
    fn append(
        &self,
        aggregate_ref: &AggregateRef,
        events: Vec<ProposedEvent>,
        expected: ExpectedVersion,
    ) -> Result<(Version, Vec<EventRecord>), StoreError> {
        let mut inner = self.lock()?;

        let head = Version(
            inner
                .streams
                .get(aggregate_ref)
                .map(|s| s.len() as u64)
                .unwrap_or(0),
        );

        let check_ok = match expected {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => head == Version::ALL,
            ExpectedVersion::Exact(v) => head == v,
        };
        if !check_ok {
            return Err(StoreError::WrongVersion {
                aggregate_ref: aggregate_ref.clone(),
                expected,
                actual: head,
            });
        }

        let recorded_at = now_millis();
        let mut records = Vec::with_capacity(events.len());
        let mut stream_version = head;
        let mut global_version = Version(inner.global.len() as u64);
        for event in events {
            stream_version = stream_version.next();
            global_version = global_version.next();
            records.push(EventRecord {
                event_id: event.event_id,
                aggregate_ref: aggregate_ref.clone(),
                stream_version,
                global_version,
                event_type: event.event_type,
                payload: event.payload,
                recorded_at,
            });
        }

        inner
            .streams
            .entry(aggregate_ref.clone())
            .or_default()
            .extend(records.iter().cloned());
        inner.global.extend(records.iter().cloned());

        Ok((stream_version, records))
    }

    fn fetch(&self, after: Version) -> Result<(Version, Vec<EventRecord>), StoreError> {
        let inner = self.lock()?;
        let head = Version(inner.global.len() as u64);
        // Global versions are dense starting at 1, so the cursor doubles as
        // an index into the global log.
        let start = (after.0 as usize).min(inner.global.len());
        Ok((head, inner.global[start..].to_vec()))
    }

    fn fetch_by_aggregate(
        &self,
        aggregate_ref: &AggregateRef,
        after: Version,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let inner = self.lock()?;
        let records = match inner.streams.get(aggregate_ref) {
            Some(stream) => {
                let start = (after.0 as usize).min(stream.len());
                stream[start..].to_vec()
            }
            None => Vec::new(),
        };
        Ok(records)
    }

    fn record_snapshot(
        &self,
        aggregate_ref: &AggregateRef,
        snapshot: StateSnapshot,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.snapshots.insert(aggregate_ref.clone(), snapshot);
        Ok(())
    }

    fn load_snapshot(
        &self,
        aggregate_ref: &AggregateRef,
    ) -> Result<Option<StateSnapshot>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.snapshots.get(aggregate_ref).cloned())
    }
}
