use std::sync::Arc;

use pb_device::{CopyRequest, DeviceResult, MemoryRegion};
use pb_header::{has_header, read_header, HeaderError};
use pb_store::ObjectBuffer;
use pb_types::{DType, Tensor, TensorDescriptor, TensorShape, TensorStorage, TypeError};
use tracing::{debug, warn};

use crate::completion::{self, Completer, Completion};
use crate::config::OpAttrs;
use crate::context::OpContext;
use crate::error::{BridgeError, BridgeResult};
use crate::region::{PinnedRange, SealedObject};
use crate::session::{BridgeSession, Direction};
use crate::signature::OpDef;
use crate::upload::parse_object_id;

/// `PlasmaToTensor`: fetch a sealed object and materialize it as one tensor.
///
/// Objects written by [`crate::UploadOp`] carry a header; its shape is used
/// and the header bytes are skipped. Objects without one are read as raw
/// elements of the op's output dtype.
#[derive(Clone, Debug)]
pub struct DownloadOp {
    session: Arc<BridgeSession>,
    attrs: OpAttrs,
    dtype: DType,
}

impl DownloadOp {
    pub fn new(session: Arc<BridgeSession>, attrs: OpAttrs) -> BridgeResult<Self> {
        OpDef::plasma_to_tensor().validate(&attrs)?;
        session.connect(&attrs.connect_params(session.config().release_delay))?;
        let dtype = attrs.dtype.unwrap_or(DType::Float32);
        Ok(Self {
            session,
            attrs,
            dtype,
        })
    }

    pub fn attrs(&self) -> &OpAttrs {
        &self.attrs
    }

    /// Output dtype.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn session(&self) -> &Arc<BridgeSession> {
        &self.session
    }

    /// Run the download on the calling thread.
    ///
    /// The store lookup blocks until the object is sealed or the session's
    /// timeout expires; use [`DownloadOp::spawn`] to keep the caller free.
    pub fn compute(&self, ctx: &OpContext, object_id: &[u8]) -> Completion<Tensor> {
        let (done, completion) = completion::channel();
        self.start(ctx, object_id, &done);
        completion
    }

    /// Run the whole download, lookup included, on a worker thread.
    pub fn spawn(&self, ctx: OpContext, object_id: Vec<u8>) -> Completion<Tensor> {
        let (done, completion) = completion::channel();
        let op = self.clone();
        let worker_done = done.clone();
        let spawned = std::thread::Builder::new()
            .name("pb-download".into())
            .spawn(move || op.start(&ctx, &object_id, &worker_done));
        if let Err(e) = spawned {
            done.complete(Err(BridgeError::Internal(format!(
                "failed to spawn download worker: {e}"
            ))));
        }
        completion
    }

    fn start(&self, ctx: &OpContext, object_id: &[u8], done: &Completer<Tensor>) {
        if let Err(e) = self.run(ctx, object_id, done) {
            warn!(error = %e, "PlasmaToTensor failed");
            done.complete(Err(e));
        }
    }

    fn run(&self, ctx: &OpContext, object_id: &[u8], done: &Completer<Tensor>) -> BridgeResult<()> {
        let id = parse_object_id(object_id)?;
        let compute = match self.session.device() {
            Some(_) => Some(ctx.require_compute_stream()?),
            None => None,
        };

        let buffer = self
            .session
            .connection()
            .get(&id, self.session.get_timeout())?;
        let (descriptor, payload_offset) = self.describe(&buffer)?;
        let len = usize::try_from(descriptor.payload_bytes()?)
            .map_err(|_| BridgeError::Resource("object payload exceeds address space".into()))?;
        debug!(%id, shape = %descriptor.shape, payload_offset, len, "object fetched");

        let storage = match self.session.device() {
            Some(device) => device.allocate(len)?,
            None => TensorStorage::try_zeroed(len).map_err(|_| {
                BridgeError::Resource(format!("cannot allocate {len} byte output"))
            })?,
        };
        let tensor = Tensor::from_storage(
            descriptor.dtype,
            descriptor.shape,
            storage.clone(),
            self.session.placement(),
        )?;

        let engine = self.session.copy_engine(Direction::Download)?;
        let pinned = PinnedRange::register(&self.session, buffer.address() + payload_offset, len);
        let src: Arc<dyn MemoryRegion> = Arc::new(SealedObject(buffer));
        let dst: Arc<dyn MemoryRegion> = Arc::new(storage);
        engine
            .copy(CopyRequest::new(dst, 0, src, payload_offset, len))
            .map_err(enqueue_failed)?;
        if let Some(compute) = compute {
            engine.signal(compute).map_err(enqueue_failed)?;
        }

        let finish = done.clone();
        engine
            .on_complete(Box::new(move |status: DeviceResult<()>| {
                drop(pinned);
                let result = status
                    .map(|()| tensor)
                    .map_err(|e| BridgeError::Internal(format!("payload copy failed: {e}")));
                finish.complete(result);
            }))
            .map_err(enqueue_failed)
    }

    /// Descriptor of the object's payload and the offset where it starts.
    ///
    /// A raw payload may begin with the header magic by chance; if what
    /// follows does not parse as a header the object is read raw.
    pub fn describe(&self, buffer: &ObjectBuffer) -> BridgeResult<(TensorDescriptor, usize)> {
        buffer.read(|bytes| -> BridgeResult<(TensorDescriptor, usize)> {
            let parsed = if has_header(bytes) {
                match read_header(bytes) {
                    Ok(parsed) => Some(parsed),
                    Err(HeaderError::Type(e)) => return Err(e.into()),
                    Err(e) => {
                        debug!(error = %e, "magic without a valid header, reading object raw");
                        None
                    }
                }
            } else {
                None
            };
            let Some((descriptor, offset)) = parsed else {
                let width = self.dtype.element_size()?;
                let elements = (bytes.len() / width) as u64;
                return Ok((
                    TensorDescriptor::new(self.dtype, TensorShape::vector(elements)),
                    0,
                ));
            };
            if descriptor.dtype != self.dtype {
                return Err(TypeError::DTypeMismatch {
                    expected: self.dtype,
                    actual: descriptor.dtype,
                }
                .into());
            }
            let needed = descriptor
                .payload_bytes()?
                .checked_add(offset as u64)
                .unwrap_or(u64::MAX);
            if needed > bytes.len() as u64 {
                return Err(HeaderError::Truncated {
                    needed: usize::try_from(needed).unwrap_or(usize::MAX),
                    available: bytes.len(),
                }
                .into());
            }
            Ok((descriptor, offset))
        })
    }
}

fn enqueue_failed(err: pb_device::DeviceError) -> BridgeError {
    BridgeError::Internal(format!("H2D memcpy failed to be enqueued: {err}"))
}
