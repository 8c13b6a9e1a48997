use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

use crate::error::{DeviceError, DeviceResult};
use crate::event::Event;
use crate::memory::{check_range, copy_region, MemoryRegion};

type Task = Box<dyn FnOnce() -> DeviceResult<()> + Send>;

enum StreamOp {
    Run { label: String, task: Task },
    WaitFor(Event),
    Record(Event),
}

/// An ordered queue of device work executed by a dedicated worker thread.
///
/// Operations run strictly in enqueue order. When an operation fails the
/// stream becomes poisoned: the rest of its queue is skipped, every event
/// recorded afterwards completes with the failure, and new enqueues are
/// refused.
pub struct Stream {
    name: String,
    sender: Mutex<Option<UnboundedSender<StreamOp>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    poison: Arc<Mutex<Option<String>>>,
}

impl Stream {
    pub fn new(name: impl Into<String>) -> DeviceResult<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let poison = Arc::new(Mutex::new(None));
        let worker = std::thread::Builder::new()
            .name(format!("pb-stream-{name}"))
            .spawn({
                let name = name.clone();
                let poison = Arc::clone(&poison);
                move || run_worker(&name, rx, &poison)
            })
            .map_err(|e| DeviceError::StreamInit {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        debug!(stream = %name, "stream created");
        Ok(Self {
            name,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            poison,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Failure that poisoned the stream, if any.
    pub fn poison_reason(&self) -> Option<String> {
        self.poison.lock().expect("stream poison lock poisoned").clone()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poison_reason().is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().expect("stream sender lock poisoned").is_none()
    }

    fn enqueue(&self, op: StreamOp) -> DeviceResult<()> {
        if let Some(reason) = self.poison_reason() {
            return Err(DeviceError::StreamPoisoned {
                name: self.name.clone(),
                reason,
            });
        }
        let sender = self.sender.lock().expect("stream sender lock poisoned");
        let sender = sender
            .as_ref()
            .ok_or_else(|| DeviceError::StreamClosed(self.name.clone()))?;
        sender
            .send(op)
            .map_err(|_| DeviceError::StreamClosed(self.name.clone()))
    }

    /// Enqueue an arbitrary unit of work, e.g. a kernel on a compute stream.
    pub fn then_run(
        &self,
        label: impl Into<String>,
        task: impl FnOnce() -> DeviceResult<()> + Send + 'static,
    ) -> DeviceResult<()> {
        self.enqueue(StreamOp::Run {
            label: label.into(),
            task: Box::new(task),
        })
    }

    /// Enqueue a copy of `len` bytes from `src[src_offset..]` into
    /// `dst[dst_offset..]`.
    ///
    /// Ranges are checked at enqueue time; a bad range is refused without
    /// touching the stream.
    pub fn then_memcpy(
        &self,
        dst: Arc<dyn MemoryRegion>,
        dst_offset: usize,
        src: Arc<dyn MemoryRegion>,
        src_offset: usize,
        len: usize,
    ) -> DeviceResult<()> {
        check_range(src_offset, len, src.len())
            .and_then(|_| check_range(dst_offset, len, dst.len()))
            .map_err(|e| DeviceError::EnqueueFailed(e.to_string()))?;
        trace!(stream = %self.name, len, src_offset, dst_offset, "enqueue memcpy");
        self.then_run(format!("memcpy {len}B"), move || {
            copy_region(dst.as_ref(), dst_offset, src.as_ref(), src_offset, len)
        })
    }

    /// Record an event that completes once all work enqueued so far has run.
    pub fn record_event(&self) -> DeviceResult<Event> {
        let event = Event::new();
        self.enqueue(StreamOp::Record(event.clone()))?;
        Ok(event)
    }

    /// Make this stream wait until all work currently enqueued on `other`
    /// has completed.
    pub fn then_wait_for(&self, other: &Stream) -> DeviceResult<()> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        let event = other.record_event()?;
        self.then_wait_for_event(event)
    }

    pub fn then_wait_for_event(&self, event: Event) -> DeviceResult<()> {
        self.enqueue(StreamOp::WaitFor(event))
    }

    /// Block until everything enqueued so far has run.
    pub fn synchronize(&self) -> DeviceResult<()> {
        self.record_event()?.wait()
    }

    /// Stop accepting work, drain the queue, and join the worker.
    ///
    /// Returns `true` if this call performed the shutdown.
    pub fn shutdown(&self) -> bool {
        let sender = self
            .sender
            .lock()
            .expect("stream sender lock poisoned")
            .take();
        if sender.is_none() {
            return false;
        }
        drop(sender);
        let worker = self.worker.lock().expect("stream worker lock poisoned").take();
        if let Some(worker) = worker {
            if worker.thread().id() == std::thread::current().id() {
                return true;
            }
            if worker.join().is_err() {
                warn!(stream = %self.name, "stream worker panicked");
            }
        }
        debug!(stream = %self.name, "stream shut down");
        true
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("name", &self.name)
            .field("poisoned", &self.is_poisoned())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn run_worker(name: &str, mut rx: UnboundedReceiver<StreamOp>, poison: &Mutex<Option<String>>) {
    let status = || poison.lock().expect("stream poison lock poisoned").clone();
    let set_poison = |reason: String| {
        let mut slot = poison.lock().expect("stream poison lock poisoned");
        if slot.is_none() {
            warn!(stream = %name, %reason, "stream poisoned");
            *slot = Some(reason);
        }
    };

    while let Some(op) = rx.blocking_recv() {
        match op {
            StreamOp::Run { label, task } => {
                if status().is_some() {
                    trace!(stream = %name, %label, "skipped on poisoned stream");
                    continue;
                }
                match panic::catch_unwind(AssertUnwindSafe(task)) {
                    Ok(Ok(())) => trace!(stream = %name, %label, "op complete"),
                    Ok(Err(e)) => set_poison(format!("{label}: {e}")),
                    Err(_) => set_poison(format!("{label}: task panicked")),
                }
            }
            StreamOp::WaitFor(event) => {
                if let Err(e) = event.wait() {
                    set_poison(format!("upstream stream failed: {e}"));
                }
            }
            StreamOp::Record(event) => match status() {
                Some(reason) => event.complete(Err(reason)),
                None => event.complete(Ok(())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pb_types::TensorStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn region(bytes: Vec<u8>) -> (TensorStorage, Arc<dyn MemoryRegion>) {
        let s = TensorStorage::from_vec(bytes);
        (s.clone(), Arc::new(s))
    }

    #[test]
    fn ops_run_in_order() {
        let stream = Stream::new("order").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let log = Arc::clone(&log);
            stream
                .then_run(format!("op{i}"), move || {
                    log.lock().unwrap().push(i);
                    Ok(())
                })
                .unwrap();
        }
        stream.synchronize().unwrap();
        assert_eq!(*log.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn memcpy_copies_bytes() {
        let stream = Stream::new("copy").unwrap();
        let (_, src) = region(vec![1, 2, 3, 4]);
        let (dst_view, dst) = region(vec![0; 6]);
        stream.then_memcpy(dst, 2, src, 0, 4).unwrap();
        stream.synchronize().unwrap();
        assert_eq!(dst_view.to_vec(), vec![0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn bad_range_is_refused_at_enqueue() {
        let stream = Stream::new("range").unwrap();
        let (_, src) = region(vec![0; 4]);
        let (_, dst) = region(vec![0; 2]);
        let err = stream.then_memcpy(dst, 0, src, 0, 4).unwrap_err();
        assert!(matches!(err, DeviceError::EnqueueFailed(_)));
        assert!(!stream.is_poisoned());
    }

    #[test]
    fn failure_poisons_stream() {
        let stream = Stream::new("poison").unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        stream
            .then_run("fail", || Err(DeviceError::ReadOnly))
            .unwrap();
        {
            let ran = Arc::clone(&ran);
            // May be accepted or refused depending on timing; it must not run.
            let _ = stream.then_run("after", move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert!(stream.synchronize().is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(matches!(
            stream.then_run("later", || Ok(())),
            Err(DeviceError::StreamPoisoned { .. })
        ));
    }

    #[test]
    fn panicking_task_poisons_instead_of_killing_worker() {
        let stream = Stream::new("panic").unwrap();
        stream.then_run("boom", || panic!("boom")).unwrap();
        let err = stream.synchronize().unwrap_err();
        assert!(matches!(err, DeviceError::OperationFailed(ref r) if r.contains("panicked")));
    }

    #[test]
    fn wait_for_orders_across_streams() {
        let producer = Stream::new("producer").unwrap();
        let consumer = Stream::new("consumer").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let log = Arc::clone(&log);
            producer
                .then_run("produce", move || {
                    std::thread::sleep(Duration::from_millis(20));
                    log.lock().unwrap().push("produce");
                    Ok(())
                })
                .unwrap();
        }
        consumer.then_wait_for(&producer).unwrap();
        {
            let log = Arc::clone(&log);
            consumer
                .then_run("consume", move || {
                    log.lock().unwrap().push("consume");
                    Ok(())
                })
                .unwrap();
        }
        consumer.synchronize().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["produce", "consume"]);
    }

    #[test]
    fn upstream_failure_poisons_waiter() {
        let producer = Stream::new("bad-producer").unwrap();
        let consumer = Stream::new("waiter").unwrap();
        producer
            .then_run("fail", || Err(DeviceError::ReadOnly))
            .unwrap();
        consumer.then_wait_for(&producer).unwrap();
        assert!(consumer.synchronize().is_err());
        assert!(consumer.is_poisoned());
    }

    #[test]
    fn shutdown_drains_and_closes() {
        let stream = Stream::new("drain").unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let ran = Arc::clone(&ran);
            stream
                .then_run("count", move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        assert!(stream.shutdown());
        assert!(!stream.shutdown());
        assert_eq!(ran.load(Ordering::SeqCst), 4);
        assert!(matches!(
            stream.then_run("late", || Ok(())),
            Err(DeviceError::StreamClosed(_))
        ));
    }

    #[test]
    fn waiting_on_self_is_a_no_op() {
        let stream = Stream::new("self").unwrap();
        stream.then_wait_for(&stream).unwrap();
        stream.synchronize().unwrap();
    }
}
