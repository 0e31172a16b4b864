//! Event envelope and version algebra shared by the store, actors, and
//! projections.
//!
//! The store assigns two orderings to every appended event: a per-stream
//! version (dense, starting at 1) and a global version (dense across the
//! whole store). [`Version::ALL`] is the distinguished minimum meaning
//! "before any event"; it is a valid read cursor but never a stored
//! position.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordered position in the event log.
///
/// Used both as a per-stream version and as a global version. The reference
/// adapter represents versions as monotonically increasing integers; other
/// adapters may map their native ordering onto this newtype as long as
/// [`Version::ALL`] stays the minimum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Version(pub u64);

impl Version {
    /// The minimum version: a cursor positioned before any event.
    pub const ALL: Version = Version(0);

    /// The immediate successor of this version.
    #[must_use]
    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Version::ALL {
            write!(f, "all")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// How a version `b` relates to a reference version `a`.
///
/// Returned by [`EventStore::compare_version`](crate::EventStore::compare_version).
/// Projections use this to deduplicate bus deliveries (`Past`/`Equal`),
/// apply in-order records (`NextOne`), and detect gaps (`Future`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRelation {
    /// `b` is strictly before `a`: already seen.
    Past,
    /// `b` equals `a`: already seen.
    Equal,
    /// `b` is the immediate successor of `a`: apply now.
    NextOne,
    /// `b` is beyond the immediate successor: records are missing in between.
    Future,
}

/// The caller's assumption about a stream's current head, checked by
/// [`append`](crate::EventStore::append).
///
/// `NoStream` is an append argument only; it is never a stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Accept any current stream head (no concurrency check).
    Any,
    /// The stream must not exist yet (first write).
    NoStream,
    /// The stream head must be exactly this version.
    Exact(Version),
}

impl std::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::NoStream => write!(f, "no-stream"),
            Self::Exact(v) => write!(f, "{v}"),
        }
    }
}

/// Identity of one aggregate instance; uniquely names its event stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateRef {
    /// Aggregate type name (e.g. `"counter"`).
    pub aggregate_type: String,
    /// Instance identifier within that type (e.g. `"c-1"`).
    pub instance_id: String,
}

impl AggregateRef {
    /// Build a reference from an aggregate type and instance id.
    pub fn new(aggregate_type: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl std::fmt::Display for AggregateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.instance_id)
    }
}

/// A domain event encoded for append, before the store assigns versions.
///
/// `event_type` and `payload` come from the adjacently-tagged serde encoding
/// of the domain event (`{"type": …, "data": …}`). The `event_id` is a fresh
/// UUID v4 stamped at encode time so downstream consumers can detect
/// redeliveries across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedEvent {
    /// Client-assigned event id.
    pub event_id: Uuid,
    /// Event type tag (e.g. `"Incremented"`).
    pub event_type: String,
    /// JSON payload; `Null` for fieldless variants.
    pub payload: serde_json::Value,
}

/// The store-assigned envelope around a domain event.
///
/// Produced by [`append`](crate::EventStore::append); immutable once
/// assigned. `stream_version` increases by exactly 1 per record within a
/// stream; `global_version` totally orders records across all streams.
/// Serializes losslessly for transport over a networked bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Client-assigned event id, carried through from the proposed event.
    pub event_id: Uuid,
    /// The stream this record belongs to.
    pub aggregate_ref: AggregateRef,
    /// Position within the stream, starting at 1.
    pub stream_version: Version,
    /// Position in the global log, starting at 1.
    pub global_version: Version,
    /// Event type tag (e.g. `"Incremented"`).
    pub event_type: String,
    /// The opaque domain event payload.
    pub payload: serde_json::Value,
    /// Append time, Unix epoch milliseconds. Informational only.
    pub recorded_at: u64,
}

/// A persisted copy of aggregate state at a known stream version.
///
/// Invariant: folding all records with `stream_version > version` into
/// `state` yields the aggregate's current state. The store keeps at most one
/// snapshot per aggregate; the latest write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Stream version up to which `state` has folded events.
    pub version: Version,
    /// Serialized aggregate state.
    pub state: serde_json::Value,
}
