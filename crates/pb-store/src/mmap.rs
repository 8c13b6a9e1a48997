use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use memmap2::{Mmap, MmapMut};
use pb_types::ObjectId;
use tracing::{debug, info};

use crate::buffer::{MutableBuffer, ObjectBuffer, Region, Segment};
use crate::error::{StoreError, StoreResult};
use crate::traits::{ConnectParams, StoreClient};

const SEALED_EXT: &str = "obj";
const BUILDING_EXT: &str = "building";
const META_EXT: &str = "meta";

/// Cross-process store client backed by memory-mapped files.
///
/// The store socket names a directory shared by every participating process.
/// Each object is one file in it:
///
/// ```text
/// <hex-id>.building   created, exclusively owned by its writer
/// <hex-id>.obj        sealed, immutable, visible to readers
/// <hex-id>.meta       optional metadata, written at create time
/// ```
///
/// Sealing flushes the mapping and renames `.building` to `.obj`, so readers
/// never observe a partially written object. `get` polls for the sealed file
/// until its deadline.
pub struct MmapClient {
    root: Mutex<Option<PathBuf>>,
    pending: Mutex<HashMap<ObjectId, Arc<Segment>>>,
    capacity: u64,
    poll_interval: Duration,
}

impl MmapClient {
    pub fn new() -> Self {
        Self::with_capacity(u64::MAX)
    }

    /// A client that refuses to grow the store directory past `capacity`
    /// bytes.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            root: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            capacity,
            poll_interval: Duration::from_millis(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn root(&self) -> StoreResult<PathBuf> {
        self.root
            .lock()
            .expect("root lock poisoned")
            .clone()
            .ok_or(StoreError::NotConnected)
    }

    fn path(root: &Path, id: &ObjectId, ext: &str) -> PathBuf {
        root.join(format!("{}.{ext}", id.to_hex()))
    }

    fn used_bytes(root: &Path) -> io::Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    fn map_sealed(root: &Path, id: &ObjectId) -> StoreResult<Option<ObjectBuffer>> {
        let file = match File::open(Self::path(root, id, SEALED_EXT)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len() as usize;
        let region = if size == 0 {
            Region::Heap(Vec::new())
        } else {
            // SAFETY: sealed object files are never written again: writers
            // only ever touch `.building` files, and the rename to `.obj`
            // happens after the final flush.
            Region::Mapped(unsafe { Mmap::map(&file)? })
        };
        let metadata = match fs::read(Self::path(root, id, META_EXT)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(ObjectBuffer::new(
            *id,
            Segment::sealed(region),
            size,
            Arc::from(metadata),
        )))
    }
}

impl Default for MmapClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreClient for MmapClient {
    fn connect(&self, params: &ConnectParams) -> StoreResult<()> {
        if params.store_socket.is_empty() {
            return Err(StoreError::InvalidSocket("empty store path".into()));
        }
        let root = PathBuf::from(&params.store_socket);
        fs::create_dir_all(&root)?;
        if !root.is_dir() {
            return Err(StoreError::InvalidSocket(params.store_socket.clone()));
        }
        info!(store = %root.display(), release_delay = params.release_delay, "connected to mmap store");
        *self.root.lock().expect("root lock poisoned") = Some(root);
        Ok(())
    }

    fn disconnect(&self) -> StoreResult<()> {
        let root = self.root.lock().expect("root lock poisoned").take();
        match root {
            Some(root) => {
                info!(store = %root.display(), "disconnected from mmap store");
                Ok(())
            }
            None => Err(StoreError::NotConnected),
        }
    }

    fn create(&self, id: &ObjectId, data_size: usize, metadata: &[u8]) -> StoreResult<MutableBuffer> {
        let root = self.root()?;
        if Self::path(&root, id, SEALED_EXT).exists() {
            return Err(StoreError::ObjectExists(*id));
        }

        let requested = data_size.saturating_add(metadata.len());
        let used = Self::used_bytes(&root)?;
        let available = self.capacity.saturating_sub(used);
        if requested as u64 > available {
            return Err(StoreError::OutOfCapacity {
                requested,
                available: available.min(usize::MAX as u64) as usize,
            });
        }

        let building = Self::path(&root, id, BUILDING_EXT);
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&building)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::ObjectExists(*id))
            }
            Err(e) => return Err(e.into()),
        };
        file.set_len(data_size as u64)?;

        let region = if data_size == 0 {
            Region::Heap(Vec::new())
        } else {
            // SAFETY: the `.building` file was just created with
            // `create_new`, so this client is its only writer until seal.
            Region::MappedMut(unsafe { MmapMut::map_mut(&file)? })
        };
        if !metadata.is_empty() {
            fs::write(Self::path(&root, id, META_EXT), metadata)?;
        }

        let segment = Segment::new(region);
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(*id, Arc::clone(&segment));
        debug!(object = %id.short_hex(), size = data_size, "created mapped object");
        Ok(MutableBuffer::new(*id, segment, data_size))
    }

    fn seal(&self, id: &ObjectId) -> StoreResult<()> {
        let root = self.root()?;
        let segment = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(id);
        let Some(segment) = segment else {
            if Self::path(&root, id, SEALED_EXT).exists() {
                return Err(StoreError::AlreadySealed(*id));
            }
            return Err(StoreError::NotCreated(*id));
        };

        segment.flush()?;
        segment.mark_sealed();
        fs::rename(
            Self::path(&root, id, BUILDING_EXT),
            Self::path(&root, id, SEALED_EXT),
        )?;
        debug!(object = %id.short_hex(), "sealed mapped object");
        Ok(())
    }

    fn get(&self, ids: &[ObjectId], timeout: Option<Duration>) -> StoreResult<Vec<Option<ObjectBuffer>>> {
        let root = self.root()?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut found: Vec<Option<ObjectBuffer>> = vec![None; ids.len()];
        loop {
            for (slot, id) in found.iter_mut().zip(ids) {
                if slot.is_none() {
                    *slot = Self::map_sealed(&root, id)?;
                }
            }
            if found.iter().all(Option::is_some) {
                return Ok(found);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(found);
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn contains(&self, id: &ObjectId) -> StoreResult<bool> {
        let root = self.root()?;
        Ok(Self::path(&root, id, SEALED_EXT).exists())
    }

    fn abort(&self, id: &ObjectId) -> StoreResult<()> {
        let root = self.root()?;
        let segment = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(id);
        if segment.is_none() {
            return Err(StoreError::NotCreated(*id));
        }
        fs::remove_file(Self::path(&root, id, BUILDING_EXT))?;
        match fs::remove_file(Self::path(&root, id, META_EXT)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(object = %id.short_hex(), "aborted mapped object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(dir: &Path) -> MmapClient {
        let client = MmapClient::new();
        client
            .connect(&ConnectParams::new(dir.to_string_lossy()))
            .unwrap();
        client
    }

    #[test]
    fn roundtrip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let client = connected(dir.path());
        let id = ObjectId::derive("file");

        let buf = client.create(&id, 5, b"m").unwrap();
        buf.write_at(0, b"hello").unwrap();
        assert!(!client.contains(&id).unwrap());
        client.seal(&id).unwrap();
        assert!(client.contains(&id).unwrap());

        let obj = client.get_one(&id, Some(Duration::ZERO)).unwrap();
        assert_eq!(obj.to_vec(), b"hello");
        assert_eq!(obj.metadata(), b"m");
    }

    #[test]
    fn separate_clients_share_objects() {
        let dir = tempfile::tempdir().unwrap();
        let writer = connected(dir.path());
        let reader = connected(dir.path());
        let id = ObjectId::derive("shared");

        let buf = writer.create(&id, 3, b"").unwrap();
        buf.write_at(0, &[7, 8, 9]).unwrap();
        assert!(reader
            .get(&[id], Some(Duration::from_millis(5)))
            .unwrap()[0]
            .is_none());
        writer.seal(&id).unwrap();

        let obj = reader.get_one(&id, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(obj.to_vec(), vec![7, 8, 9]);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = connected(dir.path());
        let b = connected(dir.path());
        let id = ObjectId::derive("dup");
        a.create(&id, 1, b"").unwrap();
        assert!(matches!(b.create(&id, 1, b""), Err(StoreError::ObjectExists(_))));
        a.seal(&id).unwrap();
        assert!(matches!(b.create(&id, 1, b""), Err(StoreError::ObjectExists(_))));
    }

    #[test]
    fn capacity_counts_files() {
        let dir = tempfile::tempdir().unwrap();
        let client = MmapClient::with_capacity(100);
        client
            .connect(&ConnectParams::new(dir.path().to_string_lossy()))
            .unwrap();
        client.create(&ObjectId::derive("a"), 80, b"").unwrap();
        assert!(matches!(
            client.create(&ObjectId::derive("b"), 30, b""),
            Err(StoreError::OutOfCapacity { .. })
        ));
    }

    #[test]
    fn abort_removes_building_file() {
        let dir = tempfile::tempdir().unwrap();
        let client = connected(dir.path());
        let id = ObjectId::derive("gone");
        client.create(&id, 8, b"meta").unwrap();
        client.abort(&id).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(matches!(client.abort(&id), Err(StoreError::NotCreated(_))));
    }

    #[test]
    fn seal_states() {
        let dir = tempfile::tempdir().unwrap();
        let client = connected(dir.path());
        let id = ObjectId::derive("s");
        assert!(matches!(client.seal(&id), Err(StoreError::NotCreated(_))));
        client.create(&id, 2, b"").unwrap();
        client.seal(&id).unwrap();
        assert!(matches!(client.seal(&id), Err(StoreError::AlreadySealed(_))));
    }

    #[test]
    fn zero_sized_object() {
        let dir = tempfile::tempdir().unwrap();
        let client = connected(dir.path());
        let id = ObjectId::derive("empty");
        client.create(&id, 0, b"").unwrap();
        client.seal(&id).unwrap();
        let obj = client.get_one(&id, None).unwrap();
        assert!(obj.is_empty());
    }

    #[test]
    fn missing_object_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let client = connected(dir.path());
        let err = client
            .get_one(&ObjectId::derive("never"), Some(Duration::from_millis(10)))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn connect_rejects_empty_socket() {
        let client = MmapClient::new();
        assert!(matches!(
            client.connect(&ConnectParams::new("")),
            Err(StoreError::InvalidSocket(_))
        ));
        assert!(matches!(client.disconnect(), Err(StoreError::NotConnected)));
    }
}
