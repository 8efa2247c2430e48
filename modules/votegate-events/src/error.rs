use thiserror::Error;
use votegate_common::{BackendKind, ConfigError};

/// Failures the vote store can report. Boundary methods that must not fail
/// (`has_satisfied_today`, `is_empty`, `append`) log these and fall back.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or credentials rejected
    #[error("failed to connect to {backend} database: {source}")]
    Connect {
        backend: BackendKind,
        #[source]
        source: sqlx::Error,
    },

    /// A single statement failed (syntax, constraint, lock timeout)
    #[error("{context}: {source}")]
    Statement {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    /// Settings rejected before connecting
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Last connect or reconnect failed
    #[error("vote store is not connected")]
    Disconnected,

    /// Worker has shut down
    #[error("vote store has been shut down")]
    Closed,

    /// Stored `vote_time` is not an ISO-8601 local date-time
    #[error("unparsable vote_time {0:?}")]
    InvalidTimestamp(String),
}

impl StoreError {
    /// A statement failed because the connection itself is gone: the socket
    /// dropped, the pool was closed, or no healthy connection came back in
    /// time. Re-opening the table is the only way forward.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            StoreError::Statement {
                source: sqlx::Error::Io(_)
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::WorkerCrashed,
                ..
            }
        )
    }

    pub(crate) fn statement(context: impl Into<String>, source: sqlx::Error) -> Self {
        StoreError::Statement {
            context: context.into(),
            source,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
