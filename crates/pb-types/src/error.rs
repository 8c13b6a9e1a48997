use thiserror::Error;

use crate::dtype::DType;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("data type is not supported: {0}")]
    UnsupportedDType(DType),

    #[error("unknown data type name: {0}")]
    UnknownDType(String),

    #[error("unknown data type tag: {0}")]
    UnknownTag(u8),

    #[error("data type mismatch: expected {expected}, got {actual}")]
    DTypeMismatch { expected: DType, actual: DType },

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("tensor byte size {actual} does not match {elements} elements of {dtype}")]
    SizeMismatch {
        dtype: DType,
        elements: u64,
        actual: usize,
    },

    #[error("shape {0} holds more bytes than fit in 64 bits")]
    ShapeOverflow(String),
}
