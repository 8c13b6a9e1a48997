//! Shared object store client for PlasmaBridge.
//!
//! The store itself (allocation, eviction, reference counting) lives outside
//! the bridge. This crate consumes it through a small client protocol:
//! connect, create, seal, get, disconnect.
//!
//! # Object Lifecycle
//!
//! 1. `create` hands the writer an exclusive, mutable [`MutableBuffer`].
//! 2. The writer fills it (header, then payload).
//! 3. `seal` makes it immutable and visible to readers.
//! 4. `get` returns read-only [`ObjectBuffer`] views to any number of readers.
//!
//! # Backends
//!
//! All backends implement the [`StoreClient`] trait:
//!
//! - [`InMemoryStore`] / [`InMemoryClient`] -- heap-backed store for tests
//!   and single-process embedding
//! - [`MmapClient`] -- cross-process store where every object is a
//!   memory-mapped file inside the store directory
//!
//! [`StoreConnection`] wraps one client in the lock-guarded, connect-once
//! handle shared by every operation instance.

pub mod buffer;
pub mod connection;
pub mod error;
pub mod memory;
pub mod mmap;
pub mod traits;

pub use buffer::{MutableBuffer, ObjectBuffer};
pub use connection::StoreConnection;
pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryClient, InMemoryStore};
pub use mmap::MmapClient;
pub use traits::{ConnectParams, StoreClient, DEFAULT_RELEASE_DELAY};
