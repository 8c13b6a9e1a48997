//! Tensor header codec for PlasmaBridge.
//!
//! Every object the bridge writes into the store starts with a small header
//! describing the tensor's dtype and shape, followed by the raw payload at a
//! 64-byte aligned offset.
//!
//! # Layout
//!
//! ```text
//! [4 bytes: magic "PBTH"]
//! [2 bytes: format version (u16 LE)]
//! [1 byte:  dtype tag]
//! [1 byte:  reserved, zero]
//! [4 bytes: rank (u32 LE)]
//! [8 * rank bytes: dimensions (u64 LE)]
//! [4 bytes: CRC32 of all preceding header bytes (u32 LE)]
//! [zero padding up to the next multiple of 64]
//! ```
//!
//! The header length depends only on the descriptor, never on payload
//! content. [`compute_header_size`] relies on this to size allocations before
//! any payload exists.

pub mod error;
pub mod format;
pub mod reader;
pub mod sizer;
pub mod writer;

pub use error::{HeaderError, HeaderResult};
pub use format::{HEADER_MAGIC, HEADER_VERSION, MAX_RANK, PAYLOAD_ALIGNMENT};
pub use reader::{has_header, read_header};
pub use sizer::{compute_header_size, CountingSink};
pub use writer::write_header;
