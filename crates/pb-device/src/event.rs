use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{DeviceError, DeviceResult};

struct EventInner {
    state: Mutex<Option<Result<(), String>>>,
    cv: Condvar,
}

/// A one-shot completion marker recorded on a stream.
///
/// The stream completes the event once every operation enqueued before it
/// has run. Completion carries the stream's status: an event recorded on a
/// poisoned stream completes with an error.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(EventInner {
                state: Mutex::new(None),
                cv: Condvar::new(),
            }),
        }
    }

    pub(crate) fn complete(&self, result: Result<(), String>) {
        let mut state = self.inner.state.lock().expect("event lock poisoned");
        if state.is_none() {
            *state = Some(result);
            self.inner.cv.notify_all();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().expect("event lock poisoned").is_some()
    }

    /// Block until the event completes.
    pub fn wait(&self) -> DeviceResult<()> {
        let mut state = self.inner.state.lock().expect("event lock poisoned");
        loop {
            if let Some(result) = state.as_ref() {
                return result.clone().map_err(DeviceError::OperationFailed);
            }
            state = self.inner.cv.wait(state).expect("event lock poisoned");
        }
    }

    /// Block for at most `timeout`. `None` means the event is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<DeviceResult<()>> {
        let state = self.inner.state.lock().expect("event lock poisoned");
        let (state, _) = self
            .inner
            .cv
            .wait_timeout_while(state, timeout, |s| s.is_none())
            .expect("event lock poisoned");
        state
            .as_ref()
            .map(|r| r.clone().map_err(DeviceError::OperationFailed))
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("complete", &self.is_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_returns_after_complete() {
        let ev = Event::new();
        let waiter = {
            let ev = ev.clone();
            thread::spawn(move || ev.wait())
        };
        thread::sleep(Duration::from_millis(5));
        ev.complete(Ok(()));
        assert!(waiter.join().expect("waiter panicked").is_ok());
    }

    #[test]
    fn error_is_propagated() {
        let ev = Event::new();
        ev.complete(Err("boom".into()));
        assert_eq!(
            ev.wait().unwrap_err(),
            DeviceError::OperationFailed("boom".into())
        );
    }

    #[test]
    fn first_completion_wins() {
        let ev = Event::new();
        ev.complete(Ok(()));
        ev.complete(Err("late".into()));
        assert!(ev.wait().is_ok());
    }

    #[test]
    fn wait_timeout_on_pending() {
        let ev = Event::new();
        assert!(ev.wait_timeout(Duration::from_millis(5)).is_none());
        assert!(!ev.is_complete());
    }
}
