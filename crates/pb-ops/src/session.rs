use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pb_device::{CopyEngine, DeviceContext, DeviceKind, HostCopyEngine, Stream, StreamCopyEngine};
use pb_store::{ConnectParams, InMemoryStore, MmapClient, StoreConnection};
use pb_types::Placement;
use tracing::{debug, error, info, warn};

use crate::config::{BridgeConfig, StoreBackend};
use crate::error::{BridgeError, BridgeResult};

/// Copy direction, relative to the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to store (`TensorToPlasma`).
    Upload,
    /// Store to device (`PlasmaToTensor`).
    Download,
}

impl Direction {
    fn role(self) -> &'static str {
        match self {
            Direction::Upload => "d2h",
            Direction::Download => "h2d",
        }
    }
}

/// Everything transfer ops share: the store connection, the device, and one
/// lazily created copy stream per direction.
///
/// Call [`BridgeSession::shutdown`] once every op using the session is done.
/// It drains and destroys the copy streams, then the device context, then
/// disconnects from the store. A session dropped without an explicit
/// shutdown performs it on drop and logs a warning.
pub struct BridgeSession {
    config: BridgeConfig,
    connection: StoreConnection,
    device: Option<DeviceContext>,
    upload_stream: Mutex<Option<Arc<Stream>>>,
    download_stream: Mutex<Option<Arc<Stream>>>,
    shut_down: AtomicBool,
}

impl BridgeSession {
    /// Build a session with the store client selected by `config.backend`.
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        let connection = match config.backend {
            StoreBackend::Memory => {
                let store = match config.capacity_bytes {
                    Some(cap) => InMemoryStore::with_capacity(usize::try_from(cap).unwrap_or(usize::MAX)),
                    None => InMemoryStore::new(),
                };
                StoreConnection::new(store.client())
            }
            StoreBackend::Mmap => {
                let client = match config.capacity_bytes {
                    Some(cap) => MmapClient::with_capacity(cap),
                    None => MmapClient::new(),
                };
                StoreConnection::new(client)
            }
        };
        Self::with_connection(config, connection)
    }

    /// Build a session around an existing, possibly shared, store connection.
    pub fn with_connection(config: BridgeConfig, connection: StoreConnection) -> BridgeResult<Self> {
        let device = match config.device {
            DeviceKind::Cpu => None,
            DeviceKind::Gpu => {
                let mut ctx = DeviceContext::new(config.device_ordinal)?;
                if let Some(limit) = config.device_memory_bytes {
                    ctx = ctx.with_memory_limit(usize::try_from(limit).unwrap_or(usize::MAX));
                }
                Some(ctx)
            }
        };
        info!(
            backend = ?config.backend,
            device = %config.device,
            store = %config.store_socket,
            "bridge session created"
        );
        Ok(Self {
            config,
            connection,
            device,
            upload_stream: Mutex::new(None),
            download_stream: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn connection(&self) -> &StoreConnection {
        &self.connection
    }

    pub fn device(&self) -> Option<&DeviceContext> {
        self.device.as_ref()
    }

    pub fn device_kind(&self) -> DeviceKind {
        self.config.device
    }

    /// Placement of tensors produced by this session.
    pub fn placement(&self) -> Placement {
        match &self.device {
            Some(ctx) => Placement::Device(ctx.ordinal()),
            None => Placement::Host,
        }
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.config.get_timeout()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn check_open(&self) -> BridgeResult<()> {
        if self.is_shut_down() {
            return Err(BridgeError::SessionClosed);
        }
        Ok(())
    }

    /// Connect to the store unless already connected.
    pub fn connect(&self, params: &ConnectParams) -> BridgeResult<bool> {
        self.check_open()?;
        Ok(self.connection.connect(params)?)
    }

    fn device_or_internal(&self) -> BridgeResult<&DeviceContext> {
        self.device
            .as_ref()
            .ok_or_else(|| BridgeError::Internal("session has no device context".into()))
    }

    fn stream_slot(&self, direction: Direction) -> &Mutex<Option<Arc<Stream>>> {
        match direction {
            Direction::Upload => &self.upload_stream,
            Direction::Download => &self.download_stream,
        }
    }

    /// The copy stream for `direction`, created by the first caller.
    pub fn copy_stream(&self, direction: Direction) -> BridgeResult<Arc<Stream>> {
        self.check_open()?;
        let device = self.device_or_internal()?;
        let mut slot = self
            .stream_slot(direction)
            .lock()
            .expect("copy stream lock poisoned");
        if let Some(stream) = slot.as_ref() {
            return Ok(Arc::clone(stream));
        }
        let stream = device.create_stream(direction.role())?;
        debug!(stream = %stream.name(), ?direction, "copy stream created");
        *slot = Some(Arc::clone(&stream));
        Ok(stream)
    }

    /// Copy engine for `direction` on this session's device kind.
    pub fn copy_engine(&self, direction: Direction) -> BridgeResult<Box<dyn CopyEngine>> {
        match self.config.device {
            DeviceKind::Cpu => Ok(Box::new(HostCopyEngine)),
            DeviceKind::Gpu => {
                let stream = self.copy_stream(direction)?;
                let events = Arc::clone(self.device_or_internal()?.event_manager());
                Ok(Box::new(StreamCopyEngine::new(stream, events)))
            }
        }
    }

    /// Tear the session down. Only the first call does anything.
    ///
    /// Returns `true` if this call performed the shutdown.
    pub fn shutdown(&self) -> BridgeResult<bool> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        for direction in [Direction::Upload, Direction::Download] {
            let stream = self
                .stream_slot(direction)
                .lock()
                .expect("copy stream lock poisoned")
                .take();
            if let Some(stream) = stream {
                stream.shutdown();
            }
        }
        if let Some(device) = &self.device {
            device.shutdown();
        }
        self.connection.disconnect()?;
        info!("bridge session shut down");
        Ok(true)
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        if self.is_shut_down() {
            return;
        }
        warn!("bridge session dropped without shutdown");
        if let Err(e) = self.shutdown() {
            error!(error = %e, "implicit session shutdown failed");
        }
    }
}

impl std::fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSession")
            .field("backend", &self.config.backend)
            .field("device", &self.config.device)
            .field("connected", &self.connection.is_connected())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu_session() -> BridgeSession {
        BridgeSession::new(BridgeConfig::in_memory().with_device(DeviceKind::Gpu, 0)).unwrap()
    }

    #[test]
    fn cpu_session_has_no_streams() {
        let session = BridgeSession::new(BridgeConfig::in_memory()).unwrap();
        assert!(session.device().is_none());
        assert_eq!(session.placement(), Placement::Host);
        assert!(matches!(
            session.copy_stream(Direction::Upload),
            Err(BridgeError::Internal(_))
        ));
        assert_eq!(
            session.copy_engine(Direction::Upload).unwrap().kind(),
            DeviceKind::Cpu
        );
        session.shutdown().unwrap();
    }

    #[test]
    fn copy_stream_is_created_once_per_direction() {
        let session = gpu_session();
        let a = session.copy_stream(Direction::Upload).unwrap();
        let b = session.copy_stream(Direction::Upload).unwrap();
        let c = session.copy_stream(Direction::Download).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(session.placement(), Placement::Device(0));
        session.shutdown().unwrap();
    }

    #[test]
    fn concurrent_first_use_creates_one_stream() {
        let session = Arc::new(gpu_session());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = Arc::clone(&session);
                std::thread::spawn(move || session.copy_stream(Direction::Download).unwrap())
            })
            .collect();
        let streams: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("stream thread panicked"))
            .collect();
        assert!(streams.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        session.shutdown().unwrap();
    }

    #[test]
    fn shutdown_runs_once_and_tears_down_in_order() {
        let session = gpu_session();
        session.connect(&ConnectParams::new("memory")).unwrap();
        let stream = session.copy_stream(Direction::Upload).unwrap();

        assert!(session.shutdown().unwrap());
        assert!(!session.shutdown().unwrap());
        assert!(stream.is_shut_down());
        assert!(!session.connection().is_connected());
        assert!(matches!(
            session.copy_stream(Direction::Upload),
            Err(BridgeError::SessionClosed)
        ));
        assert!(matches!(
            session.connect(&ConnectParams::new("memory")),
            Err(BridgeError::SessionClosed)
        ));
    }

    #[test]
    fn drop_without_shutdown_cleans_up() {
        let session = gpu_session();
        let stream = session.copy_stream(Direction::Download).unwrap();
        drop(session);
        assert!(stream.is_shut_down());
    }
}
