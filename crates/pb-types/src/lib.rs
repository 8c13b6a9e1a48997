//! Foundation types for PlasmaBridge.
//!
//! This crate provides the identifier, dtype, and tensor types shared by the
//! header codec, the store client, the device runtime, and the transfer ops.
//! Every other PlasmaBridge crate depends on `pb-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`] — Fixed-length (20-byte) binary name of a store object
//! - [`DType`] — Element type tag; only fixed-width numerics are transferable
//! - [`TensorShape`] — Ordered, non-negative dimension sizes
//! - [`Tensor`] — Typed view over shared, placement-tagged byte storage

pub mod dtype;
pub mod error;
pub mod object;
pub mod tensor;

pub use dtype::{DType, Element};
pub use error::TypeError;
pub use object::{ObjectId, OBJECT_ID_SIZE};
pub use tensor::{Placement, Tensor, TensorDescriptor, TensorShape, TensorStorage};
