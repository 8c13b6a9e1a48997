use std::sync::Mutex;
use std::thread::JoinHandle;

use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, warn};

use crate::error::{DeviceError, DeviceResult};
use crate::event::Event;
use crate::stream::Stream;

/// Callback invoked with the status of the stream it was attached to.
pub type Callback = Box<dyn FnOnce(DeviceResult<()>) + Send>;

/// Runs host callbacks once the work ahead of them on a stream completes.
///
/// Callbacks execute on the manager's own thread, never on the thread that
/// enqueued them or on a stream worker, in the order they were attached.
pub struct EventManager {
    sender: Mutex<Option<UnboundedSender<(Event, Callback)>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventManager {
    pub fn new() -> DeviceResult<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Event, Callback)>();
        let worker = std::thread::Builder::new()
            .name("pb-event-manager".into())
            .spawn(move || {
                while let Some((event, callback)) = rx.blocking_recv() {
                    callback(event.wait());
                }
            })
            .map_err(|e| DeviceError::StreamInit {
                name: "event-manager".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Invoke `callback` after all work currently enqueued on `stream` has
    /// completed. The callback receives the stream's status at that point.
    pub fn then_execute(
        &self,
        stream: &Stream,
        callback: impl FnOnce(DeviceResult<()>) + Send + 'static,
    ) -> DeviceResult<()> {
        let event = stream.record_event()?;
        self.then_execute_event(event, Box::new(callback))
    }

    pub fn then_execute_event(&self, event: Event, callback: Callback) -> DeviceResult<()> {
        let sender = self.sender.lock().expect("event manager lock poisoned");
        let sender = sender
            .as_ref()
            .ok_or_else(|| DeviceError::StreamClosed("event-manager".into()))?;
        sender
            .send((event, callback))
            .map_err(|_| DeviceError::StreamClosed("event-manager".into()))
    }

    /// Run every pending callback and stop the manager thread.
    pub fn shutdown(&self) -> bool {
        let sender = self.sender.lock().expect("event manager lock poisoned").take();
        if sender.is_none() {
            return false;
        }
        drop(sender);
        if let Some(worker) = self.worker.lock().expect("event manager lock poisoned").take() {
            // A callback may release the last handle to the manager's owner.
            if worker.thread().id() == std::thread::current().id() {
                debug!("event manager shut down from its own callback");
                return true;
            }
            if worker.join().is_err() {
                warn!("event manager callback panicked");
            }
        }
        debug!("event manager shut down");
        true
    }
}

impl Drop for EventManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager").finish_non_exhaustive()
    }
}
