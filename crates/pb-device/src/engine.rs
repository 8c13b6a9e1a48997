use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::DeviceResult;
use crate::event_manager::{Callback, EventManager};
use crate::memory::{copy_region, MemoryRegion};
use crate::stream::Stream;

/// Where a transfer executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Gpu,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Gpu => "gpu",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" | "host" => Ok(DeviceKind::Cpu),
            "gpu" | "cuda" | "device" => Ok(DeviceKind::Gpu),
            _ => Err(format!("unknown device kind: {s}")),
        }
    }
}

/// One byte-range copy between two regions.
pub struct CopyRequest {
    pub dst: Arc<dyn MemoryRegion>,
    pub dst_offset: usize,
    pub src: Arc<dyn MemoryRegion>,
    pub src_offset: usize,
    pub len: usize,
}

impl CopyRequest {
    pub fn new(
        dst: Arc<dyn MemoryRegion>,
        dst_offset: usize,
        src: Arc<dyn MemoryRegion>,
        src_offset: usize,
        len: usize,
    ) -> Self {
        Self {
            dst,
            dst_offset,
            src,
            src_offset,
            len,
        }
    }
}

/// The copy capability shared by the host and device transfer paths.
///
/// A transfer is: order after the producer, issue copies, let the consumer
/// order after the copies, then run a completion callback. The host engine
/// does each step synchronously; the stream engine enqueues them.
pub trait CopyEngine: Send + Sync {
    fn kind(&self) -> DeviceKind;

    /// Order subsequent copies after all work currently on `upstream`.
    fn wait_for(&self, upstream: &Stream) -> DeviceResult<()>;

    fn copy(&self, request: CopyRequest) -> DeviceResult<()>;

    /// Order all work subsequently enqueued on `downstream` after the copies
    /// issued so far.
    fn signal(&self, downstream: &Stream) -> DeviceResult<()>;

    /// Run `callback` once every copy issued so far has completed.
    fn on_complete(&self, callback: Callback) -> DeviceResult<()>;
}

/// Synchronous copies on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostCopyEngine;

impl CopyEngine for HostCopyEngine {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Cpu
    }

    fn wait_for(&self, _upstream: &Stream) -> DeviceResult<()> {
        Ok(())
    }

    fn copy(&self, request: CopyRequest) -> DeviceResult<()> {
        trace!(len = request.len, "host copy");
        copy_region(
            request.dst.as_ref(),
            request.dst_offset,
            request.src.as_ref(),
            request.src_offset,
            request.len,
        )
    }

    fn signal(&self, _downstream: &Stream) -> DeviceResult<()> {
        Ok(())
    }

    fn on_complete(&self, callback: Callback) -> DeviceResult<()> {
        callback(Ok(()));
        Ok(())
    }
}

/// Asynchronous copies on a dedicated copy stream.
#[derive(Debug, Clone)]
pub struct StreamCopyEngine {
    stream: Arc<Stream>,
    events: Arc<EventManager>,
}

impl StreamCopyEngine {
    pub fn new(stream: Arc<Stream>, events: Arc<EventManager>) -> Self {
        Self { stream, events }
    }

    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }
}

impl CopyEngine for StreamCopyEngine {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Gpu
    }

    fn wait_for(&self, upstream: &Stream) -> DeviceResult<()> {
        self.stream.then_wait_for(upstream)
    }

    fn copy(&self, request: CopyRequest) -> DeviceResult<()> {
        self.stream.then_memcpy(
            request.dst,
            request.dst_offset,
            request.src,
            request.src_offset,
            request.len,
        )
    }

    fn signal(&self, downstream: &Stream) -> DeviceResult<()> {
        downstream.then_wait_for(&self.stream)
    }

    fn on_complete(&self, callback: Callback) -> DeviceResult<()> {
        let event = self.stream.record_event()?;
        self.events.then_execute_event(event, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pb_types::TensorStorage;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    fn regions() -> (TensorStorage, Arc<dyn MemoryRegion>, Arc<dyn MemoryRegion>) {
        let dst = TensorStorage::from_vec(vec![0; 4]);
        let src: Arc<dyn MemoryRegion> = Arc::new(TensorStorage::from_vec(vec![7, 8, 9, 10]));
        (dst.clone(), Arc::new(dst), src)
    }

    #[test]
    fn parse_device_kind() {
        assert_eq!("cpu".parse::<DeviceKind>().unwrap(), DeviceKind::Cpu);
        assert_eq!("GPU".parse::<DeviceKind>().unwrap(), DeviceKind::Gpu);
        assert!("tpu".parse::<DeviceKind>().is_err());
        assert_eq!(DeviceKind::default(), DeviceKind::Cpu);
    }

    #[test]
    fn host_engine_copies_and_completes_inline() {
        let engine = HostCopyEngine;
        let (view, dst, src) = regions();
        engine.copy(CopyRequest::new(dst, 0, src, 0, 4)).unwrap();
        assert_eq!(view.to_vec(), vec![7, 8, 9, 10]);

        let done = Arc::new(Mutex::new(false));
        {
            let done = Arc::clone(&done);
            engine
                .on_complete(Box::new(move |r: DeviceResult<()>| *done.lock().unwrap() = r.is_ok()))
                .unwrap();
        }
        assert!(*done.lock().unwrap());
    }

    #[test]
    fn stream_engine_completes_after_copies() {
        let events = Arc::new(EventManager::new().unwrap());
        let engine = StreamCopyEngine::new(Arc::new(Stream::new("engine").unwrap()), events);
        let compute = Stream::new("compute").unwrap();
        let (view, dst, src) = regions();

        engine.wait_for(&compute).unwrap();
        engine.copy(CopyRequest::new(dst, 0, src, 0, 4)).unwrap();
        let (tx, rx) = mpsc::channel();
        {
            let view = view.clone();
            engine
                .on_complete(Box::new(move |r: DeviceResult<()>| {
                    tx.send((r, view.to_vec())).unwrap();
                }))
                .unwrap();
        }
        let (status, seen) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(status.is_ok());
        assert_eq!(seen, vec![7, 8, 9, 10]);
    }

    #[test]
    fn signal_orders_downstream_after_copies() {
        let events = Arc::new(EventManager::new().unwrap());
        let copy = Arc::new(Stream::new("slow-copy").unwrap());
        let engine = StreamCopyEngine::new(Arc::clone(&copy), events);
        let compute = Stream::new("consumer").unwrap();
        copy.then_run("stall", || {
            std::thread::sleep(Duration::from_millis(20));
            Ok(())
        })
        .unwrap();
        let (view, dst, src) = regions();
        engine.copy(CopyRequest::new(dst, 0, src, 0, 4)).unwrap();
        engine.signal(&compute).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            compute
                .then_run("read", move || {
                    *seen.lock().unwrap() = view.to_vec();
                    Ok(())
                })
                .unwrap();
        }
        compute.synchronize().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![7, 8, 9, 10]);
    }
}
