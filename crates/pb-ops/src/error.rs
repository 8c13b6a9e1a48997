use pb_device::DeviceError;
use pb_header::HeaderError;
use pb_store::StoreError;
use pb_types::TypeError;
use thiserror::Error;

/// Status taxonomy reported to the caller's scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    TypeError,
    InvalidArgument,
    Internal,
    Resource,
    NotFound,
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatusCode::Ok => "OK",
            StatusCode::TypeError => "TYPE_ERROR",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Resource => "RESOURCE_EXHAUSTED",
            StatusCode::NotFound => "NOT_FOUND",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("header error: {0}")]
    Header(#[from] HeaderError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("resource exhausted: {0}")]
    Resource(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("session is shut down")]
    SessionClosed,

    #[error("operation was dropped before it completed")]
    Abandoned,

    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::Type(TypeError::ShapeOverflow(_)) => StatusCode::InvalidArgument,
            BridgeError::Type(_) => StatusCode::TypeError,
            BridgeError::InvalidArgument(_) | BridgeError::Config(_) => StatusCode::InvalidArgument,
            BridgeError::Header(e) => match e {
                HeaderError::Type(_) => StatusCode::TypeError,
                HeaderError::RankTooLarge { .. } => StatusCode::InvalidArgument,
                _ => StatusCode::Internal,
            },
            BridgeError::Store(e) => match e {
                StoreError::NotFound(_) => StatusCode::NotFound,
                StoreError::OutOfCapacity { .. } => StatusCode::Resource,
                StoreError::InvalidSocket(_) => StatusCode::InvalidArgument,
                _ => StatusCode::Internal,
            },
            BridgeError::Device(DeviceError::AllocationFailed { .. }) => StatusCode::Resource,
            BridgeError::Device(_) => StatusCode::Internal,
            BridgeError::Resource(_) => StatusCode::Resource,
            BridgeError::SessionClosed | BridgeError::Abandoned | BridgeError::Internal(_) => {
                StatusCode::Internal
            }
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
