use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{BridgeError, BridgeResult};

/// Receiving end of an operation's completion.
///
/// Resolves exactly once, with the operation's result. Await it from async
/// code or call [`Completion::wait`] from a plain thread.
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<BridgeResult<T>>,
}

/// Sending end of a completion. Clones share one slot; the first result
/// delivered wins and later ones are dropped.
#[derive(Debug)]
pub struct Completer<T> {
    tx: Arc<Mutex<Option<oneshot::Sender<BridgeResult<T>>>>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

pub fn channel<T>() -> (Completer<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Completer {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        Completion { rx },
    )
}

impl<T> Completer<T> {
    /// Deliver `result`. Returns `false` if a result was already delivered.
    pub fn complete(&self, result: BridgeResult<T>) -> bool {
        let tx = self.tx.lock().expect("completer lock poisoned").take();
        match tx {
            Some(tx) => {
                // The receiver may have been dropped; nobody is waiting then.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.tx.lock().expect("completer lock poisoned").is_none()
    }
}

impl<T> Completion<T> {
    /// A completion that is already resolved.
    pub fn ready(result: BridgeResult<T>) -> Self {
        let (done, completion) = channel();
        done.complete(result);
        completion
    }

    /// Block the current thread until the operation completes.
    ///
    /// Must not be called from inside an async runtime; await instead.
    pub fn wait(self) -> BridgeResult<T> {
        self.rx.blocking_recv().unwrap_or(Err(BridgeError::Abandoned))
    }
}

impl<T> Future for Completion<T> {
    type Output = BridgeResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(BridgeError::Abandoned)))
    }
}
