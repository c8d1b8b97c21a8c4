use uuid::Uuid;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A row referenced by sid does not exist.
    #[error("entity not found: {0}")]
    EntityNotFound(Uuid),

    /// An entity with the same path already exists in the registry.
    #[error("duplicate entity path: {0:?}")]
    DuplicatePath(String),

    /// Another transaction holds the write lock on the entity.
    #[error("entity {0} is locked by another transaction")]
    Locked(Uuid),

    /// A property row could not be decoded.
    #[error("corrupt property row {name:?}: {reason}")]
    CorruptProperty {
        /// Storage-encoded property name.
        name: String,
        reason: String,
    },

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;
