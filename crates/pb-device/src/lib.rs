//! Device runtime used by the PlasmaBridge transfer paths.
//!
//! A [`DeviceContext`] owns streams, device memory, and the registry of host
//! regions pinned for transfers. A [`Stream`] is an ordered queue of work run
//! by its own worker thread; cross-stream ordering is expressed with
//! [`Stream::then_wait_for`]. The [`EventManager`] runs host callbacks once
//! the work ahead of them on a stream has completed.
//!
//! Transfer code talks to a [`CopyEngine`]: [`HostCopyEngine`] copies on the
//! calling thread, [`StreamCopyEngine`] enqueues onto a copy stream.

pub mod context;
pub mod engine;
pub mod error;
pub mod event;
pub mod event_manager;
pub mod memory;
pub mod stream;

pub use context::DeviceContext;
pub use engine::{CopyEngine, CopyRequest, DeviceKind, HostCopyEngine, StreamCopyEngine};
pub use error::{DeviceError, DeviceResult};
pub use event::Event;
pub use event_manager::{Callback, EventManager};
pub use memory::{copy_region, MemoryRegion};
pub use stream::Stream;
