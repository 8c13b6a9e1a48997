use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use pb_types::ObjectId;
use tracing::{debug, info};

use crate::buffer::{MutableBuffer, ObjectBuffer};
use crate::error::{StoreError, StoreResult};
use crate::traits::{ConnectParams, StoreClient};

struct Inner {
    client: Box<dyn StoreClient>,
    params: Option<ConnectParams>,
}

/// The single, shared connection every transfer operation talks through.
///
/// One mutex serializes all store calls, since many operation instances may
/// run concurrently against the same client. `connect` is idempotent: only
/// the first call reaches the store.
///
/// Blocking lookups do not hold the lock while they wait. [`get`] probes the
/// store under the lock and sleeps between probes, so a reader waiting for an
/// object never stalls the writer that is about to seal it.
///
/// [`get`]: StoreConnection::get
pub struct StoreConnection {
    inner: Mutex<Inner>,
    poll_interval: Duration,
}

impl StoreConnection {
    pub fn new(client: impl StoreClient + 'static) -> Self {
        Self::from_boxed(Box::new(client))
    }

    pub fn from_boxed(client: Box<dyn StoreClient>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                client,
                params: None,
            }),
            poll_interval: Duration::from_millis(1),
        }
    }

    /// Interval between probes while [`StoreConnection::get`] waits.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("store connection lock poisoned")
    }

    fn connected(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        let inner = self.lock();
        if inner.params.is_none() {
            return Err(StoreError::NotConnected);
        }
        Ok(inner)
    }

    /// Connect unless already connected.
    ///
    /// Returns `true` if this call performed the connection and `false` if an
    /// earlier call already had.
    pub fn connect(&self, params: &ConnectParams) -> StoreResult<bool> {
        let mut inner = self.lock();
        if inner.params.is_some() {
            debug!(store = %params.store_socket, "already connected");
            return Ok(false);
        }
        info!(store = %params.store_socket, manager = %params.manager_socket, "connecting to object store");
        inner.client.connect(params)?;
        inner.params = Some(params.clone());
        info!("connected");
        Ok(true)
    }

    pub fn is_connected(&self) -> bool {
        self.lock().params.is_some()
    }

    /// Parameters of the active connection.
    pub fn params(&self) -> Option<ConnectParams> {
        self.lock().params.clone()
    }

    /// Allocate a new exclusive object of exactly `size` bytes.
    pub fn create(&self, id: &ObjectId, size: usize) -> StoreResult<MutableBuffer> {
        self.create_with_metadata(id, size, &[])
    }

    pub fn create_with_metadata(
        &self,
        id: &ObjectId,
        size: usize,
        metadata: &[u8],
    ) -> StoreResult<MutableBuffer> {
        self.connected()?.client.create(id, size, metadata)
    }

    pub fn seal(&self, id: &ObjectId) -> StoreResult<()> {
        self.connected()?.client.seal(id)
    }

    pub fn contains(&self, id: &ObjectId) -> StoreResult<bool> {
        self.connected()?.client.contains(id)
    }

    pub fn abort(&self, id: &ObjectId) -> StoreResult<()> {
        self.connected()?.client.abort(id)
    }

    /// Fetch a sealed object, waiting up to `timeout` (`None` waits forever).
    ///
    /// A miss at the deadline is [`StoreError::NotFound`].
    pub fn get(&self, id: &ObjectId, timeout: Option<Duration>) -> StoreResult<ObjectBuffer> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let probe = self
                .connected()?
                .client
                .get(std::slice::from_ref(id), Some(Duration::ZERO))?
                .pop()
                .flatten();
            if let Some(buffer) = probe {
                return Ok(buffer);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(StoreError::NotFound(*id));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Disconnect if connected.
    ///
    /// Returns `true` if this call performed the disconnect.
    pub fn disconnect(&self) -> StoreResult<bool> {
        let mut inner = self.lock();
        if inner.params.is_none() {
            return Ok(false);
        }
        inner.client.disconnect()?;
        inner.params = None;
        info!("disconnected from object store");
        Ok(true)
    }
}

impl std::fmt::Debug for StoreConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConnection")
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use std::sync::Arc;
    use std::thread;

    fn connection() -> (InMemoryStore, StoreConnection) {
        let store = InMemoryStore::new();
        let conn = StoreConnection::new(store.client());
        conn.connect(&ConnectParams::new("memory")).unwrap();
        (store, conn)
    }

    #[test]
    fn connect_is_idempotent() {
        let store = InMemoryStore::new();
        let conn = StoreConnection::new(store.client());
        assert!(!conn.is_connected());
        assert!(conn.connect(&ConnectParams::new("memory")).unwrap());
        assert!(!conn.connect(&ConnectParams::new("memory")).unwrap());
        assert!(conn.is_connected());
    }

    #[test]
    fn concurrent_first_connect_connects_once() {
        let store = InMemoryStore::new();
        let conn = Arc::new(StoreConnection::new(store.client()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let conn = Arc::clone(&conn);
                thread::spawn(move || conn.connect(&ConnectParams::new("memory")).unwrap())
            })
            .collect();
        let performed = handles
            .into_iter()
            .map(|h| h.join().expect("connect thread panicked"))
            .filter(|&did| did)
            .count();
        assert_eq!(performed, 1);
    }

    #[test]
    fn disconnect_once() {
        let (_store, conn) = connection();
        assert!(conn.disconnect().unwrap());
        assert!(!conn.disconnect().unwrap());
        assert!(matches!(
            conn.create(&ObjectId::derive("x"), 1),
            Err(StoreError::NotConnected)
        ));
    }

    #[test]
    fn get_times_out_with_not_found() {
        let (_store, conn) = connection();
        let err = conn
            .get(&ObjectId::derive("missing"), Some(Duration::from_millis(10)))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn waiting_reader_does_not_block_writer() {
        let (_store, conn) = connection();
        let conn = Arc::new(conn);
        let id = ObjectId::derive("late");

        let reader = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || conn.get(&id, None).map(|b| b.to_vec()))
        };
        thread::sleep(Duration::from_millis(10));

        let buf = conn.create(&id, 2).unwrap();
        buf.write_at(0, &[4, 2]).unwrap();
        conn.seal(&id).unwrap();

        assert_eq!(reader.join().expect("reader panicked").unwrap(), vec![4, 2]);
    }

    #[test]
    fn params_are_remembered() {
        let (_store, conn) = connection();
        assert_eq!(conn.params().unwrap().store_socket, "memory");
    }
}
