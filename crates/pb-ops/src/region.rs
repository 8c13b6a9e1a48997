use std::sync::Arc;

use pb_device::{DeviceError, DeviceResult, MemoryRegion};
use pb_store::{MutableBuffer, ObjectBuffer, StoreError};
use tracing::debug;

use crate::session::BridgeSession;

fn subrange(data: &[u8], offset: usize, len: usize) -> DeviceResult<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or(DeviceError::OutOfRange {
            offset,
            len,
            size: data.len(),
        })
}

fn store_to_device(err: StoreError) -> DeviceError {
    match err {
        StoreError::OutOfBounds { offset, len, size } => DeviceError::OutOfRange { offset, len, size },
        StoreError::AlreadySealed(_) => DeviceError::ReadOnly,
        other => DeviceError::OperationFailed(other.to_string()),
    }
}

/// An object under construction, as a copy destination.
pub(crate) struct WritableObject(pub MutableBuffer);

impl MemoryRegion for WritableObject {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn address(&self) -> usize {
        self.0.address()
    }

    fn read_with(
        &self,
        offset: usize,
        len: usize,
        f: &mut dyn FnMut(&[u8]) -> DeviceResult<()>,
    ) -> DeviceResult<()> {
        self.0
            .with_mut(|data| subrange(data, offset, len).and_then(|bytes| f(bytes)))
            .map_err(store_to_device)?
    }

    fn write_at(&self, offset: usize, src: &[u8]) -> DeviceResult<()> {
        self.0.write_at(offset, src).map_err(store_to_device)
    }
}

/// A sealed object, as a copy source.
pub(crate) struct SealedObject(pub ObjectBuffer);

impl MemoryRegion for SealedObject {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn address(&self) -> usize {
        self.0.address()
    }

    fn read_with(
        &self,
        offset: usize,
        len: usize,
        f: &mut dyn FnMut(&[u8]) -> DeviceResult<()>,
    ) -> DeviceResult<()> {
        self.0.read(|data| subrange(data, offset, len).and_then(|bytes| f(bytes)))
    }

    fn write_at(&self, _offset: usize, _src: &[u8]) -> DeviceResult<()> {
        Err(DeviceError::ReadOnly)
    }
}

/// Host range pinned for one transfer; unpinned on drop.
///
/// A range that was already pinned when the transfer started belongs to
/// someone else and is left registered.
pub(crate) struct PinnedRange {
    session: Arc<BridgeSession>,
    address: usize,
    owned: bool,
}

impl PinnedRange {
    /// Pin `len` bytes at `address` on the session's device, if it has one.
    pub(crate) fn register(session: &Arc<BridgeSession>, address: usize, len: usize) -> Option<Self> {
        let device = session.device()?;
        let owned = device.host_memory_register(address, len);
        if !owned {
            debug!(address = %format!("{address:#x}"), "range already registered");
        }
        Some(Self {
            session: Arc::clone(session),
            address,
            owned,
        })
    }
}

impl Drop for PinnedRange {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Some(device) = self.session.device() {
            device.host_memory_unregister(self.address);
        }
    }
}
