use thiserror::Error;

use pb_types::TypeError;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("buffer too small for header: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("rank {rank} exceeds maximum of {max}")]
    RankTooLarge { rank: usize, max: usize },

    #[error("invalid header magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    #[error("unsupported header version: {0}")]
    UnsupportedVersion(u16),

    #[error("truncated header: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("header CRC mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    CrcMismatch { expected: u32, computed: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HeaderResult<T> = Result<T, HeaderError>;
