//! Crate-level error types for command execution and state retrieval.

use crate::store::StoreError;

/// Error returned when executing a command against an aggregate fails.
///
/// Generic over `E`, the domain-specific error type that the aggregate's
/// command handler may produce (e.g., "insufficient funds").
#[derive(Debug, thiserror::Error)]
pub enum CommandError<E: std::error::Error + Send + Sync + 'static> {
    /// Command rejected by aggregate logic.
    ///
    /// Wraps the domain-specific error returned from the aggregate's
    /// command handler. The aggregate instance stays live and no events
    /// were appended.
    #[error(transparent)]
    Rejected(E),

    /// Optimistic-concurrency conflict on append.
    ///
    /// Another writer moved this aggregate's stream, which the
    /// single-writer model forbids. The instance is discarded; the next
    /// command re-hydrates from the store and re-validates.
    #[error("optimistic concurrency conflict: aggregate stream moved under us")]
    Conflict,

    /// The event store failed.
    ///
    /// For [`StoreError::Unavailable`] the instance stays live and the
    /// caller may retry.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A produced domain event could not be serialized for append.
    ///
    /// No events were appended; the instance stays live.
    #[error("domain event serialization failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The caller-supplied timeout elapsed before the command completed.
    ///
    /// The in-flight command is not cancelled; the aggregate finishes it
    /// (and its append) regardless.
    #[error("timed out waiting for the aggregate to process the command")]
    Timeout,

    /// The aggregate instance exited before replying.
    #[error("aggregate instance is no longer running")]
    ActorGone,
}

/// Error returned when reading the current state of an aggregate or
/// projection fails.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The event store failed while re-deriving state.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The instance exited before replying.
    #[error("instance is no longer running")]
    ActorGone,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal domain error for testing `CommandError<E>`.
    #[derive(Debug, thiserror::Error)]
    #[error("test domain error")]
    struct TestDomainError;

    #[test]
    fn rejected_displays_the_inner_error() {
        let err: CommandError<TestDomainError> = CommandError::Rejected(TestDomainError);
        assert_eq!(err.to_string(), "test domain error");
    }

    #[test]
    fn store_error_converts_into_command_error() {
        let err: CommandError<TestDomainError> =
            CommandError::from(StoreError::Unavailable("down".to_string()));
        assert!(err.to_string().contains("down"));
    }

    #[test]
    fn conflict_and_timeout_display() {
        let conflict: CommandError<TestDomainError> = CommandError::Conflict;
        assert!(conflict.to_string().contains("conflict"));

        let timeout: CommandError<TestDomainError> = CommandError::Timeout;
        assert!(timeout.to_string().contains("timed out"));
    }

    // Verify `Send + Sync` bounds are satisfied so errors can cross thread
    // boundaries, which is required for use with `tokio` channels.
    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<CommandError<TestDomainError>>();
            assert_send_sync::<StateError>();
        }
    };
}
