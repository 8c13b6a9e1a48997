use pb_types::ObjectId;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The client has not connected (or has already disconnected).
    #[error("not connected to the object store")]
    NotConnected,

    /// An object with this ID already exists (sealed or under construction).
    #[error("object already exists: {0}")]
    ObjectExists(ObjectId),

    /// The requested object was not found before the timeout expired.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// The store cannot hold an object of the requested size.
    #[error("store out of capacity: requested {requested} bytes, {available} available")]
    OutOfCapacity { requested: usize, available: usize },

    /// Seal was requested for an object that is not under construction.
    #[error("object is not under construction: {0}")]
    NotCreated(ObjectId),

    /// A write was attempted after the object was sealed.
    #[error("object is sealed and immutable: {0}")]
    AlreadySealed(ObjectId),

    /// A write fell outside the object's data region.
    #[error("write of {len} bytes at offset {offset} exceeds object size {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// The store socket name cannot be used by this backend.
    #[error("invalid store socket: {0}")]
    InvalidSocket(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
