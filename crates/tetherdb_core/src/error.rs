//! Error types for TetherDB core.

use crate::entity::EntityKey;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in TetherDB core operations.
///
/// Every variant is final at this layer: nothing is retried and a failed
/// write leaves no partial effects behind. Callers re-obtain a context or a
/// reference instead of repeating the call.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tetherdb_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] tetherdb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Raw access to a managed reference outside a scope that holds it.
    #[error("{key} is not resolved in an open context on this thread")]
    InvalidScopeAccess {
        /// Key of the referenced entity.
        key: EntityKey,
    },

    /// A write was attempted through a reference to an unmanaged entity.
    #[error("cannot write through a reference to an unmanaged entity")]
    UnmanagedWriteAttempt,

    /// The context was closed.
    #[error("context is closed")]
    ContextClosed,

    /// The entity is not present in the snapshot it was resolved against.
    #[error("{key} does not exist in the current snapshot")]
    EntityInvalid {
        /// Key of the missing entity.
        key: EntityKey,
    },

    /// The factory was shut down.
    #[error("context factory has been shut down")]
    FactoryShutdown,

    /// A key was resolved as the wrong entity type.
    #[error("key of kind `{actual}` cannot be resolved as `{expected}`")]
    KindMismatch {
        /// Kind the caller asked for.
        expected: &'static str,
        /// Kind carried by the key.
        actual: String,
    },

    /// The write transaction was aborted.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// Another process holds the database directory.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Invalid database layout or format version.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A commit log frame is damaged.
    #[error("commit log corrupted at offset {offset}: {message}")]
    LogCorruption {
        /// Offset of the damaged frame.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// A commit log frame failed its checksum.
    #[error("checksum mismatch in commit log frame at offset {offset}")]
    ChecksumMismatch {
        /// Offset of the frame.
        offset: u64,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a scope violation error.
    pub fn invalid_scope_access(key: EntityKey) -> Self {
        Self::InvalidScopeAccess { key }
    }

    /// Creates an invalid entity error.
    pub fn entity_invalid(key: EntityKey) -> Self {
        Self::EntityInvalid { key }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a commit log corruption error.
    pub fn log_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::LogCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for scope violations and closed contexts, the errors
    /// that mean the caller held on to something past its lifetime.
    #[must_use]
    pub fn is_scope_error(&self) -> bool {
        matches!(self, Self::InvalidScopeAccess { .. } | Self::ContextClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;

    #[test]
    fn scope_errors_are_classified() {
        let key = EntityKey::new("beatmap", EntityId::from_bytes([1; 16]));
        assert!(CoreError::invalid_scope_access(key.clone()).is_scope_error());
        assert!(CoreError::ContextClosed.is_scope_error());
        assert!(!CoreError::entity_invalid(key).is_scope_error());
        assert!(!CoreError::UnmanagedWriteAttempt.is_scope_error());
    }

    #[test]
    fn messages_name_the_key() {
        let key = EntityKey::new("beatmap", EntityId::from_bytes([0; 16]));
        let message = CoreError::entity_invalid(key).to_string();
        assert!(message.starts_with("beatmap/"));
    }
}
