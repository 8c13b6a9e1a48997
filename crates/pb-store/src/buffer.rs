use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use memmap2::{Mmap, MmapMut};
use pb_types::ObjectId;

use crate::error::{StoreError, StoreResult};

/// Backing memory of one object.
pub(crate) enum Region {
    Heap(Vec<u8>),
    MappedMut(MmapMut),
    Mapped(Mmap),
}

impl Region {
    fn as_slice(&self) -> &[u8] {
        match self {
            Region::Heap(v) => v.as_slice(),
            Region::MappedMut(m) => &m[..],
            Region::Mapped(m) => &m[..],
        }
    }

    fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            Region::Heap(v) => Some(v.as_mut_slice()),
            Region::MappedMut(m) => Some(&mut m[..]),
            Region::Mapped(_) => None,
        }
    }
}

/// A store allocation shared between the writer's buffer, the backend, and
/// any readers.
pub(crate) struct Segment {
    region: RwLock<Region>,
    sealed: AtomicBool,
}

impl Segment {
    pub(crate) fn new(region: Region) -> Arc<Self> {
        Arc::new(Self {
            region: RwLock::new(region),
            sealed: AtomicBool::new(false),
        })
    }

    pub(crate) fn sealed(region: Region) -> Arc<Self> {
        let segment = Self::new(region);
        segment.mark_sealed();
        segment
    }

    pub(crate) fn mark_sealed(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub(crate) fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Flush a file-backed mapping to its file.
    pub(crate) fn flush(&self) -> std::io::Result<()> {
        let region = self.region.read().expect("segment lock poisoned");
        match &*region {
            Region::MappedMut(m) => m.flush(),
            _ => Ok(()),
        }
    }

    fn address(&self) -> usize {
        let region = self.region.read().expect("segment lock poisoned");
        region.as_slice().as_ptr() as usize
    }
}

/// Exclusive, mutable view of an object under construction.
///
/// Returned by `create`. Clones refer to the same allocation so that
/// asynchronous copies can keep the destination alive until they complete.
/// Every write fails once the object has been sealed.
#[derive(Clone)]
pub struct MutableBuffer {
    id: ObjectId,
    segment: Arc<Segment>,
    size: usize,
}

impl MutableBuffer {
    pub(crate) fn new(id: ObjectId, segment: Arc<Segment>, size: usize) -> Self {
        Self { id, segment, size }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    /// Size of the data region in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.segment.is_sealed()
    }

    /// Host address of the first data byte. Stable for the buffer's lifetime.
    pub fn address(&self) -> usize {
        self.segment.address()
    }

    /// Run `f` with mutable access to the whole data region.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> StoreResult<R> {
        if self.segment.is_sealed() {
            return Err(StoreError::AlreadySealed(self.id));
        }
        let mut region = self.segment.region.write().expect("segment lock poisoned");
        let data = region
            .as_mut_slice()
            .ok_or(StoreError::AlreadySealed(self.id))?;
        Ok(f(&mut data[..self.size]))
    }

    /// Copy `bytes` into the data region at `offset`.
    pub fn write_at(&self, offset: usize, bytes: &[u8]) -> StoreResult<()> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= self.size)
            .ok_or(StoreError::OutOfBounds {
                offset,
                len: bytes.len(),
                size: self.size,
            })?;
        self.with_mut(|data| data[offset..end].copy_from_slice(bytes))
    }

    /// Snapshot of the current data bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        let region = self.segment.region.read().expect("segment lock poisoned");
        region.as_slice()[..self.size].to_vec()
    }
}

impl fmt::Debug for MutableBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableBuffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

/// Read-only view of a sealed object.
#[derive(Clone)]
pub struct ObjectBuffer {
    id: ObjectId,
    segment: Arc<Segment>,
    size: usize,
    metadata: Arc<[u8]>,
}

impl ObjectBuffer {
    pub(crate) fn new(id: ObjectId, segment: Arc<Segment>, size: usize, metadata: Arc<[u8]>) -> Self {
        Self {
            id,
            segment,
            size,
            metadata,
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    /// Size of the data region in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    pub fn address(&self) -> usize {
        self.segment.address()
    }

    /// Run `f` with shared access to the data region.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let region = self.segment.region.read().expect("segment lock poisoned");
        f(&region.as_slice()[..self.size])
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.read(|data| data.to_vec())
    }
}

impl fmt::Debug for ObjectBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBuffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("metadata_len", &self.metadata.len())
            .finish()
    }
}
