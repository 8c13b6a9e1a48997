use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pb_types::TensorStorage;
use tracing::{debug, info};

use crate::error::{DeviceError, DeviceResult};
use crate::event_manager::EventManager;
use crate::stream::Stream;

/// Handle to one accelerator: its streams, its memory, and the host regions
/// pinned for transfers.
///
/// Device memory is emulated with host allocations, so every transfer path
/// can run without an accelerator present. The ordering guarantees are the
/// ones a real device gives: work on a stream is ordered, cross-stream
/// ordering exists only through explicit waits.
pub struct DeviceContext {
    ordinal: u32,
    memory_limit: Option<usize>,
    allocated: AtomicUsize,
    pinned: Mutex<HashMap<usize, usize>>,
    events: Arc<EventManager>,
    next_stream: AtomicUsize,
    shut_down: AtomicBool,
}

impl DeviceContext {
    pub fn new(ordinal: u32) -> DeviceResult<Self> {
        info!(ordinal, "opening device context");
        Ok(Self {
            ordinal,
            memory_limit: None,
            allocated: AtomicUsize::new(0),
            pinned: Mutex::new(HashMap::new()),
            events: Arc::new(EventManager::new()?),
            next_stream: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Cap on total device memory handed out by [`DeviceContext::allocate`].
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    fn check_open(&self) -> DeviceResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(DeviceError::ContextShutdown(self.ordinal));
        }
        Ok(())
    }

    /// Create a new stream on this device.
    pub fn create_stream(&self, role: &str) -> DeviceResult<Arc<Stream>> {
        self.check_open()?;
        let n = self.next_stream.fetch_add(1, Ordering::Relaxed);
        let stream = Stream::new(format!("d{}-{role}-{n}", self.ordinal))?;
        Ok(Arc::new(stream))
    }

    pub fn event_manager(&self) -> &Arc<EventManager> {
        &self.events
    }

    /// Pin a host region for device transfers.
    ///
    /// Registering an already pinned address is a no-op; returns `true` only
    /// when the region was newly registered.
    pub fn host_memory_register(&self, address: usize, len: usize) -> bool {
        let mut pinned = self.pinned.lock().expect("pinned registry lock poisoned");
        if pinned.contains_key(&address) {
            return false;
        }
        pinned.insert(address, len);
        debug!(
            ordinal = self.ordinal,
            address = %format!("{address:#x}"),
            len,
            "host memory registered"
        );
        true
    }

    pub fn host_memory_unregister(&self, address: usize) -> bool {
        self.pinned
            .lock()
            .expect("pinned registry lock poisoned")
            .remove(&address)
            .is_some()
    }

    pub fn is_registered(&self, address: usize) -> bool {
        self.pinned
            .lock()
            .expect("pinned registry lock poisoned")
            .contains_key(&address)
    }

    pub fn registered_count(&self) -> usize {
        self.pinned.lock().expect("pinned registry lock poisoned").len()
    }

    /// Allocate zeroed device memory.
    pub fn allocate(&self, len: usize) -> DeviceResult<TensorStorage> {
        self.check_open()?;
        if let Some(limit) = self.memory_limit {
            let reserved = self
                .allocated
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                    used.checked_add(len).filter(|&total| total <= limit)
                });
            if let Err(used) = reserved {
                return Err(DeviceError::AllocationFailed {
                    requested: len,
                    available: limit.saturating_sub(used),
                });
            }
        } else {
            self.allocated.fetch_add(len, Ordering::AcqRel);
        }
        TensorStorage::try_zeroed(len).map_err(|_| {
            self.allocated.fetch_sub(len, Ordering::AcqRel);
            DeviceError::AllocationFailed {
                requested: len,
                available: 0,
            }
        })
    }

    /// Bytes handed out by [`DeviceContext::allocate`] so far.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Run pending callbacks and refuse further streams and allocations.
    ///
    /// Streams created from this context must be shut down first.
    pub fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.events.shutdown();
        self.pinned.lock().expect("pinned registry lock poisoned").clear();
        info!(ordinal = self.ordinal, "device context shut down");
        true
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("ordinal", &self.ordinal)
            .field("allocated", &self.allocated_bytes())
            .field("pinned", &self.registered_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let ctx = DeviceContext::new(0).unwrap();
        assert!(ctx.host_memory_register(0x1000, 64));
        assert!(!ctx.host_memory_register(0x1000, 64));
        assert!(ctx.is_registered(0x1000));
        assert_eq!(ctx.registered_count(), 1);
        assert!(ctx.host_memory_unregister(0x1000));
        assert!(!ctx.is_registered(0x1000));
    }

    #[test]
    fn allocation_respects_limit() {
        let ctx = DeviceContext::new(0).unwrap().with_memory_limit(100);
        let a = ctx.allocate(60).unwrap();
        assert_eq!(a.len(), 60);
        let err = ctx.allocate(60).unwrap_err();
        assert_eq!(
            err,
            DeviceError::AllocationFailed {
                requested: 60,
                available: 40
            }
        );
        assert_eq!(ctx.allocated_bytes(), 60);
    }

    #[test]
    fn streams_have_distinct_names() {
        let ctx = DeviceContext::new(1).unwrap();
        let a = ctx.create_stream("upload").unwrap();
        let b = ctx.create_stream("upload").unwrap();
        assert_ne!(a.name(), b.name());
        assert!(a.name().starts_with("d1-upload-"));
    }

    #[test]
    fn shutdown_refuses_new_work() {
        let ctx = DeviceContext::new(0).unwrap();
        assert!(ctx.shutdown());
        assert!(!ctx.shutdown());
        assert_eq!(
            ctx.create_stream("x").unwrap_err(),
            DeviceError::ContextShutdown(0)
        );
        assert!(ctx.allocate(1).is_err());
    }
}
