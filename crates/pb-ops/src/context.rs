use std::sync::Arc;

use pb_device::Stream;

use crate::error::{BridgeError, BridgeResult};

/// Per-invocation context handed in by the calling runtime.
#[derive(Clone, Debug, Default)]
pub struct OpContext {
    compute_stream: Option<Arc<Stream>>,
}

impl OpContext {
    /// Invocation on the host; no compute stream.
    pub fn host() -> Self {
        Self::default()
    }

    /// Invocation whose inputs are produced (or outputs consumed) on
    /// `stream`.
    pub fn on_stream(stream: Arc<Stream>) -> Self {
        Self {
            compute_stream: Some(stream),
        }
    }

    pub fn compute_stream(&self) -> Option<&Arc<Stream>> {
        self.compute_stream.as_ref()
    }

    pub(crate) fn require_compute_stream(&self) -> BridgeResult<&Arc<Stream>> {
        self.compute_stream
            .as_ref()
            .ok_or_else(|| BridgeError::Internal("no compute stream available".into()))
    }
}
