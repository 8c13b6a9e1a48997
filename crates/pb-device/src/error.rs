/// Errors produced by the device runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// A stream worker could not be started.
    #[error("failed to initialize stream {name}: {reason}")]
    StreamInit { name: String, reason: String },

    /// The stream has been shut down and accepts no more work.
    #[error("stream {0} is shut down")]
    StreamClosed(String),

    /// An earlier operation on the stream failed; later work is refused.
    #[error("stream {name} is poisoned: {reason}")]
    StreamPoisoned { name: String, reason: String },

    /// A copy could not be enqueued (bad range, closed stream).
    #[error("copy could not be enqueued: {0}")]
    EnqueueFailed(String),

    /// An enqueued operation failed while executing.
    #[error("stream operation failed: {0}")]
    OperationFailed(String),

    /// Access outside a memory region.
    #[error("access of {len} bytes at offset {offset} exceeds region of {size} bytes")]
    OutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// The region cannot be written (sealed store object, read-only view).
    #[error("memory region is read-only")]
    ReadOnly,

    /// Device memory could not be allocated.
    #[error("device allocation of {requested} bytes failed ({available} available)")]
    AllocationFailed { requested: usize, available: usize },

    /// The device context was shut down.
    #[error("device context {0} is shut down")]
    ContextShutdown(u32),
}

pub type DeviceResult<T> = Result<T, DeviceError>;
