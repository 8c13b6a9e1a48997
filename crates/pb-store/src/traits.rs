use std::time::Duration;

use pb_types::ObjectId;
use serde::{Deserialize, Serialize};

use crate::buffer::{MutableBuffer, ObjectBuffer};
use crate::error::{StoreError, StoreResult};

/// Release delay the store applies when the caller does not choose one.
pub const DEFAULT_RELEASE_DELAY: u32 = 64;

/// Endpoint parameters passed to [`StoreClient::connect`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    /// Store endpoint. For the memory-mapped backend this is the store
    /// directory.
    pub store_socket: String,
    /// Manager endpoint. Accepted for protocol compatibility; empty when no
    /// manager is running.
    pub manager_socket: String,
    /// Number of released objects the client keeps mapped before returning
    /// them to the store.
    pub release_delay: u32,
}

impl ConnectParams {
    pub fn new(store_socket: impl Into<String>) -> Self {
        Self {
            store_socket: store_socket.into(),
            manager_socket: String::new(),
            release_delay: DEFAULT_RELEASE_DELAY,
        }
    }
}

/// Client side of the object store protocol.
///
/// All implementations must satisfy these invariants:
/// - `create` hands out an exclusive buffer; nobody else can observe the
///   object until `seal`.
/// - `seal` is the last store operation on a written buffer and makes the
///   object immutable.
/// - `get` only ever returns sealed objects.
/// - Every method other than `connect` fails with
///   [`StoreError::NotConnected`] on a disconnected client.
pub trait StoreClient: Send + Sync {
    fn connect(&self, params: &ConnectParams) -> StoreResult<()>;

    fn disconnect(&self) -> StoreResult<()>;

    /// Allocate a new object of exactly `data_size` bytes plus `metadata`.
    ///
    /// Fails if `id` already exists or the store is out of capacity.
    fn create(&self, id: &ObjectId, data_size: usize, metadata: &[u8]) -> StoreResult<MutableBuffer>;

    /// Make a created object immutable and visible to readers.
    fn seal(&self, id: &ObjectId) -> StoreResult<()>;

    /// Fetch sealed objects, waiting up to `timeout` for missing ones.
    ///
    /// `None` waits indefinitely. The result has one slot per requested ID;
    /// objects still missing at the deadline are `None`.
    fn get(&self, ids: &[ObjectId], timeout: Option<Duration>) -> StoreResult<Vec<Option<ObjectBuffer>>>;

    /// Returns `true` if a sealed object with this ID exists.
    fn contains(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Discard an object that was created but never sealed.
    fn abort(&self, id: &ObjectId) -> StoreResult<()>;

    /// Fetch a single object, mapping a miss to [`StoreError::NotFound`].
    fn get_one(&self, id: &ObjectId, timeout: Option<Duration>) -> StoreResult<ObjectBuffer> {
        self.get(std::slice::from_ref(id), timeout)?
            .pop()
            .flatten()
            .ok_or(StoreError::NotFound(*id))
    }
}
