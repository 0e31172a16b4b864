//! Aggregate trait and the domain-event encode/decode bridge.

use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::record::{EventRecord, ProposedEvent};

/// A domain aggregate whose state is derived from its event stream.
///
/// The implementing type itself serves as the aggregate's state.
/// State is built by folding domain events through the
/// [`apply`](Aggregate::apply) method.
///
/// # Associated Types
///
/// - `Command`: the set of commands this aggregate can handle.
/// - `DomainEvent`: the set of events this aggregate can produce and apply.
/// - `Error`: command rejection / validation error.
///
/// # Contract
///
/// - [`handle`](Aggregate::handle) must be a pure decision function: no I/O,
///   no side effects, no state mutation. It validates a command against the
///   current state and returns zero or more events, or an error to reject.
/// - [`apply`](Aggregate::apply) must be a pure, total, deterministic
///   function: the same event sequence must fold to the same state on every
///   replay. Unknown event variants should be ignored for forward
///   compatibility.
/// - `DomainEvent` must be an adjacently tagged enum
///   (`#[serde(tag = "type", content = "data")]`); the runtime stores the
///   tag and payload separately and reconstructs the enum on replay.
pub trait Aggregate:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Identifies this aggregate type (e.g. `"counter"`). Names the stream
    /// together with the instance id.
    const AGGREGATE_TYPE: &'static str;

    /// The set of commands this aggregate can handle.
    type Command: Send + 'static;

    /// The set of events this aggregate can produce and apply.
    type DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone + 'static;

    /// Command rejection / validation error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Validate a command against the current state and produce events.
    ///
    /// Returns `Ok(vec![])` if the command is a no-op.
    /// Returns `Err` to reject the command; the aggregate stays live and no
    /// events are appended.
    fn handle(&self, cmd: Self::Command) -> Result<Vec<Self::DomainEvent>, Self::Error>;

    /// Apply a single event to produce the next state.
    ///
    /// Unknown event variants should be ignored (return `self` unchanged)
    /// to maintain forward compatibility.
    fn apply(self, event: &Self::DomainEvent) -> Self;
}

/// Encode a domain event for append.
///
/// The adjacently tagged serde encoding produces an object like
/// `{"type": "Incremented"}` or `{"type": "Added", "data": {"amount": 5}}`;
/// the `"type"` field becomes [`ProposedEvent::event_type`] and the `"data"`
/// field (absent for fieldless variants) becomes the payload. A fresh UUID v4
/// event id is stamped on.
///
/// # Errors
///
/// Returns `serde_json::Error` if the domain event cannot be serialized.
pub(crate) fn encode_event<A: Aggregate>(
    event: &A::DomainEvent,
) -> serde_json::Result<ProposedEvent> {
    let value = serde_json::to_value(event)?;
    let obj = value
        .as_object()
        .expect("adjacently tagged enum must serialize to a JSON object");

    let event_type = obj["type"]
        .as_str()
        .expect("adjacently tagged enum must have a string 'type' field")
        .to_string();

    // Data may be absent for fieldless variants.
    let payload = obj.get("data").cloned().unwrap_or(serde_json::Value::Null);

    Ok(ProposedEvent {
        event_id: Uuid::new_v4(),
        event_type,
        payload,
    })
}

/// Decode a stored record back into `A`'s domain event.
///
/// Reconstructs the adjacently tagged JSON object from the record's type tag
/// and payload, then deserializes. Returns `None` for unknown or malformed
/// event types so that replay skips them for forward compatibility.
pub(crate) fn decode_event<A: Aggregate>(record: &EventRecord) -> Option<A::DomainEvent> {
    let tagged = if record.payload.is_null() {
        // Fieldless variant: just `{"type": "VariantName"}`
        serde_json::json!({ "type": record.event_type })
    } else {
        serde_json::json!({
            "type": record.event_type,
            "data": record.payload,
        })
    };
    serde_json::from_value::<A::DomainEvent>(tagged).ok()
}

/// Fold a slice of stored records into `state` via [`Aggregate::apply`].
///
/// Records that do not decode as `A::DomainEvent` are skipped.
pub(crate) fn fold_records<A: Aggregate>(state: A, records: &[EventRecord]) -> A {
    records.iter().fold(state, |state, record| {
        match decode_event::<A>(record) {
            Some(event) => state.apply(&event),
            // Unknown or malformed event type -- skip for forward compatibility.
            None => state,
        }
    })
}
