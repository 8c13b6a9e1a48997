use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use pb_types::ObjectId;
use tracing::debug;

use crate::buffer::{MutableBuffer, ObjectBuffer, Region, Segment};
use crate::error::{StoreError, StoreResult};
use crate::traits::{ConnectParams, StoreClient};

struct Entry {
    segment: Arc<Segment>,
    size: usize,
    metadata: Arc<[u8]>,
    sealed: bool,
}

#[derive(Default)]
struct State {
    objects: HashMap<ObjectId, Entry>,
    used: usize,
}

struct Shared {
    state: Mutex<State>,
    sealed_cv: Condvar,
    capacity: usize,
}

/// In-memory object store engine.
///
/// Objects are heap allocations behind a mutex; `get` waits on a condition
/// variable that `seal` signals. Cloning yields another handle to the same
/// store, so several clients (see [`InMemoryStore::client`]) can share it the
/// way processes share a real store.
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    /// Create a store with effectively unlimited capacity.
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Create a store that holds at most `capacity` bytes of data and
    /// metadata.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                sealed_cv: Condvar::new(),
                capacity,
            }),
        }
    }

    /// A new, not yet connected client of this store.
    pub fn client(&self) -> InMemoryClient {
        InMemoryClient {
            store: self.clone(),
            connected: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Bytes currently allocated, sealed or not.
    pub fn used_bytes(&self) -> usize {
        self.lock().used
    }

    /// Number of sealed objects.
    pub fn sealed_count(&self) -> usize {
        self.lock().objects.values().filter(|e| e.sealed).count()
    }

    /// Number of objects created but not yet sealed.
    pub fn pending_count(&self) -> usize {
        self.lock().objects.values().filter(|e| !e.sealed).count()
    }

    /// Drop a sealed object from the store. Readers holding buffers keep
    /// their views alive. Returns `true` if the object existed.
    pub fn evict(&self, id: &ObjectId) -> bool {
        let mut state = self.lock();
        match state.objects.get(id) {
            Some(entry) if entry.sealed => {
                let freed = entry.size + entry.metadata.len();
                state.objects.remove(id);
                state.used -= freed;
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.shared.state.lock().expect("store lock poisoned")
    }

    fn create(&self, id: &ObjectId, data_size: usize, metadata: &[u8]) -> StoreResult<MutableBuffer> {
        let mut state = self.lock();
        if state.objects.contains_key(id) {
            return Err(StoreError::ObjectExists(*id));
        }

        let requested = data_size.saturating_add(metadata.len());
        let available = self.shared.capacity - state.used;
        if requested > available {
            return Err(StoreError::OutOfCapacity {
                requested,
                available,
            });
        }

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(data_size)
            .map_err(|_| StoreError::OutOfCapacity {
                requested,
                available,
            })?;
        bytes.resize(data_size, 0);

        let segment = Segment::new(Region::Heap(bytes));
        state.objects.insert(
            *id,
            Entry {
                segment: Arc::clone(&segment),
                size: data_size,
                metadata: Arc::from(metadata),
                sealed: false,
            },
        );
        state.used += requested;
        debug!(object = %id.short_hex(), size = data_size, "created object");
        Ok(MutableBuffer::new(*id, segment, data_size))
    }

    fn seal(&self, id: &ObjectId) -> StoreResult<()> {
        let mut state = self.lock();
        let entry = state
            .objects
            .get_mut(id)
            .ok_or(StoreError::NotCreated(*id))?;
        if entry.sealed {
            return Err(StoreError::AlreadySealed(*id));
        }
        entry.segment.mark_sealed();
        entry.sealed = true;
        drop(state);
        self.shared.sealed_cv.notify_all();
        debug!(object = %id.short_hex(), "sealed object");
        Ok(())
    }

    fn get(&self, ids: &[ObjectId], timeout: Option<Duration>) -> Vec<Option<ObjectBuffer>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        loop {
            let found: Vec<Option<ObjectBuffer>> = ids
                .iter()
                .map(|id| {
                    state.objects.get(id).filter(|e| e.sealed).map(|e| {
                        ObjectBuffer::new(*id, Arc::clone(&e.segment), e.size, Arc::clone(&e.metadata))
                    })
                })
                .collect();
            if found.iter().all(Option::is_some) {
                return found;
            }
            state = match deadline {
                None => self
                    .shared
                    .sealed_cv
                    .wait(state)
                    .expect("store lock poisoned"),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return found;
                    }
                    self.shared
                        .sealed_cv
                        .wait_timeout(state, deadline - now)
                        .expect("store lock poisoned")
                        .0
                }
            };
        }
    }

    fn contains(&self, id: &ObjectId) -> bool {
        self.lock().objects.get(id).is_some_and(|e| e.sealed)
    }

    fn abort(&self, id: &ObjectId) -> StoreResult<()> {
        let mut state = self.lock();
        match state.objects.get(id) {
            None => Err(StoreError::NotCreated(*id)),
            Some(entry) if entry.sealed => Err(StoreError::AlreadySealed(*id)),
            Some(entry) => {
                let freed = entry.size + entry.metadata.len();
                state.objects.remove(id);
                state.used -= freed;
                debug!(object = %id.short_hex(), "aborted object");
                Ok(())
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("InMemoryStore")
            .field("object_count", &state.objects.len())
            .field("used_bytes", &state.used)
            .finish()
    }
}

/// A connection to an [`InMemoryStore`].
pub struct InMemoryClient {
    store: InMemoryStore,
    connected: AtomicBool,
}

impl InMemoryClient {
    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    fn ensure_connected(&self) -> StoreResult<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }
}

impl StoreClient for InMemoryClient {
    fn connect(&self, params: &ConnectParams) -> StoreResult<()> {
        debug!(store = %params.store_socket, "connecting in-memory client");
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    fn disconnect(&self) -> StoreResult<()> {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return Err(StoreError::NotConnected);
        }
        Ok(())
    }

    fn create(&self, id: &ObjectId, data_size: usize, metadata: &[u8]) -> StoreResult<MutableBuffer> {
        self.ensure_connected()?;
        self.store.create(id, data_size, metadata)
    }

    fn seal(&self, id: &ObjectId) -> StoreResult<()> {
        self.ensure_connected()?;
        self.store.seal(id)
    }

    fn get(&self, ids: &[ObjectId], timeout: Option<Duration>) -> StoreResult<Vec<Option<ObjectBuffer>>> {
        self.ensure_connected()?;
        Ok(self.store.get(ids, timeout))
    }

    fn contains(&self, id: &ObjectId) -> StoreResult<bool> {
        self.ensure_connected()?;
        Ok(self.store.contains(id))
    }

    fn abort(&self, id: &ObjectId) -> StoreResult<()> {
        self.ensure_connected()?;
        self.store.abort(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn connected(store: &InMemoryStore) -> InMemoryClient {
        let client = store.client();
        client.connect(&ConnectParams::new("memory")).unwrap();
        client
    }

    #[test]
    fn create_write_seal_get() {
        let store = InMemoryStore::new();
        let client = connected(&store);
        let id = ObjectId::derive("a");

        let buf = client.create(&id, 4, b"").unwrap();
        buf.write_at(0, &[1, 2, 3, 4]).unwrap();
        assert!(!client.contains(&id).unwrap());
        client.seal(&id).unwrap();
        assert!(client.contains(&id).unwrap());

        let obj = client.get_one(&id, Some(Duration::ZERO)).unwrap();
        assert_eq!(obj.to_vec(), vec![1, 2, 3, 4]);
        assert!(buf.is_sealed());
    }

    #[test]
    fn unsealed_objects_are_invisible() {
        let store = InMemoryStore::new();
        let client = connected(&store);
        let id = ObjectId::derive("pending");
        client.create(&id, 8, b"").unwrap();
        let result = client.get(&[id], Some(Duration::from_millis(10))).unwrap();
        assert!(result[0].is_none());
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn duplicate_create_fails() {
        let store = InMemoryStore::new();
        let client = connected(&store);
        let id = ObjectId::derive("dup");
        client.create(&id, 1, b"").unwrap();
        assert!(matches!(
            client.create(&id, 1, b""),
            Err(StoreError::ObjectExists(_))
        ));
    }

    #[test]
    fn capacity_is_enforced() {
        let store = InMemoryStore::with_capacity(100);
        let client = connected(&store);
        client.create(&ObjectId::derive("x"), 60, b"").unwrap();
        let err = client.create(&ObjectId::derive("y"), 50, b"").unwrap_err();
        assert!(matches!(
            err,
            StoreError::OutOfCapacity {
                requested: 50,
                available: 40
            }
        ));
        assert_eq!(store.used_bytes(), 60);
    }

    #[test]
    fn metadata_counts_and_is_returned() {
        let store = InMemoryStore::new();
        let client = connected(&store);
        let id = ObjectId::derive("meta");
        client.create(&id, 2, b"abc").unwrap();
        client.seal(&id).unwrap();
        assert_eq!(store.used_bytes(), 5);
        let obj = client.get_one(&id, None).unwrap();
        assert_eq!(obj.metadata(), b"abc");
        assert_eq!(obj.len(), 2);
    }

    #[test]
    fn seal_twice_or_unknown_fails() {
        let store = InMemoryStore::new();
        let client = connected(&store);
        let id = ObjectId::derive("s");
        assert!(matches!(client.seal(&id), Err(StoreError::NotCreated(_))));
        client.create(&id, 1, b"").unwrap();
        client.seal(&id).unwrap();
        assert!(matches!(client.seal(&id), Err(StoreError::AlreadySealed(_))));
    }

    #[test]
    fn abort_frees_unsealed_object() {
        let store = InMemoryStore::new();
        let client = connected(&store);
        let id = ObjectId::derive("abort");
        client.create(&id, 16, b"").unwrap();
        client.abort(&id).unwrap();
        assert_eq!(store.used_bytes(), 0);
        // The ID can be reused afterwards.
        client.create(&id, 16, b"").unwrap();
    }

    #[test]
    fn evict_releases_sealed_object() {
        let store = InMemoryStore::new();
        let client = connected(&store);
        let id = ObjectId::derive("evict");
        client.create(&id, 4, b"").unwrap();
        client.seal(&id).unwrap();
        let held = client.get_one(&id, None).unwrap();
        assert!(store.evict(&id));
        assert!(!client.contains(&id).unwrap());
        assert_eq!(held.len(), 4);
        assert!(!store.evict(&id));
    }

    #[test]
    fn missing_object_times_out() {
        let store = InMemoryStore::new();
        let client = connected(&store);
        let id = ObjectId::derive("never");
        let err = client
            .get_one(&id, Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn get_blocks_until_sealed() {
        let store = InMemoryStore::new();
        let reader = connected(&store);
        let writer = connected(&store);
        let id = ObjectId::derive("later");

        let handle = thread::spawn(move || reader.get_one(&id, None).map(|b| b.to_vec()));

        thread::sleep(Duration::from_millis(20));
        let buf = writer.create(&id, 3, b"").unwrap();
        buf.write_at(0, b"xyz").unwrap();
        writer.seal(&id).unwrap();

        let data = handle.join().expect("reader panicked").unwrap();
        assert_eq!(data, b"xyz");
    }

    #[test]
    fn operations_require_connection() {
        let store = InMemoryStore::new();
        let client = store.client();
        let id = ObjectId::derive("nc");
        assert!(matches!(
            client.create(&id, 1, b""),
            Err(StoreError::NotConnected)
        ));
        client.connect(&ConnectParams::new("memory")).unwrap();
        client.disconnect().unwrap();
        assert!(matches!(client.disconnect(), Err(StoreError::NotConnected)));
        assert!(matches!(client.contains(&id), Err(StoreError::NotConnected)));
    }
}
