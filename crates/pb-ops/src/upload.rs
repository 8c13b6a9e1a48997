use std::sync::Arc;

use pb_device::{CopyRequest, DeviceResult, MemoryRegion};
use pb_header::{compute_header_size, write_header};
use pb_store::MutableBuffer;
use pb_types::{DType, ObjectId, Tensor, TensorShape, TypeError};
use tracing::{debug, warn};

use crate::completion::{self, Completer, Completion};
use crate::config::OpAttrs;
use crate::context::OpContext;
use crate::error::{BridgeError, BridgeResult};
use crate::region::{PinnedRange, WritableObject};
use crate::session::{BridgeSession, Direction};
use crate::signature::OpDef;

/// Validated layout of one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    pub id: ObjectId,
    pub dtype: DType,
    /// Prefix sums of input byte sizes: `offsets[0] == 0`, last is the total.
    pub offsets: Vec<usize>,
    pub shape: TensorShape,
}

impl UploadPlan {
    pub fn total_bytes(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }
}

pub(crate) fn parse_object_id(object_id: &[u8]) -> BridgeResult<ObjectId> {
    ObjectId::from_binary(object_id)
        .map_err(|e| BridgeError::InvalidArgument(format!("plasma_object_id: {e}")))
}

/// `TensorToPlasma`: concatenate N same-dtype tensors into one sealed store
/// object, prefixed with a header describing the flattened result.
#[derive(Clone, Debug)]
pub struct UploadOp {
    session: Arc<BridgeSession>,
    attrs: OpAttrs,
}

impl UploadOp {
    pub fn new(session: Arc<BridgeSession>, attrs: OpAttrs) -> BridgeResult<Self> {
        OpDef::tensor_to_plasma().validate(&attrs)?;
        session.connect(&attrs.connect_params(session.config().release_delay))?;
        Ok(Self { session, attrs })
    }

    pub fn attrs(&self) -> &OpAttrs {
        &self.attrs
    }

    pub fn session(&self) -> &Arc<BridgeSession> {
        &self.session
    }

    /// Check inputs and compute the object layout without touching the store.
    pub fn plan(&self, inputs: &[Tensor], object_id: &[u8]) -> BridgeResult<UploadPlan> {
        if inputs.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "input should have at least 1 tensor and 1 object_id".into(),
            ));
        }
        let id = parse_object_id(object_id)?;

        let dtype = inputs[0].dtype();
        if let Some(other) = inputs.iter().find(|t| t.dtype() != dtype) {
            return Err(TypeError::DTypeMismatch {
                expected: dtype,
                actual: other.dtype(),
            }
            .into());
        }
        if !self.attrs.dtypes.is_empty() {
            if self.attrs.dtypes.len() != inputs.len() {
                return Err(BridgeError::InvalidArgument(format!(
                    "dtypes attr lists {} types for {} inputs",
                    self.attrs.dtypes.len(),
                    inputs.len()
                )));
            }
            if let Some(&declared) = self.attrs.dtypes.iter().find(|&&d| d != dtype) {
                return Err(TypeError::DTypeMismatch {
                    expected: declared,
                    actual: dtype,
                }
                .into());
            }
        }
        let width = dtype.element_size()?;

        let mut offsets = Vec::with_capacity(inputs.len() + 1);
        offsets.push(0);
        let mut total = 0usize;
        for (i, input) in inputs.iter().enumerate() {
            let bytes = input.total_bytes();
            if bytes == 0 {
                return Err(BridgeError::InvalidArgument(format!("input {i} is empty")));
            }
            if bytes as u64 != input.num_elements() * width as u64 {
                return Err(TypeError::SizeMismatch {
                    dtype,
                    elements: input.num_elements(),
                    actual: bytes,
                }
                .into());
            }
            total = total
                .checked_add(bytes)
                .ok_or_else(|| BridgeError::Resource("total upload size overflows".into()))?;
            offsets.push(total);
        }

        Ok(UploadPlan {
            id,
            dtype,
            offsets,
            shape: TensorShape::vector((total / width) as u64),
        })
    }

    /// Start the upload. The object is sealed, and the completion resolved,
    /// only after every payload copy has finished.
    ///
    /// A failure after the object was created leaves it unsealed in the
    /// store; releasing it is up to the store's own object lifecycle.
    pub fn compute(&self, ctx: &OpContext, inputs: &[Tensor], object_id: &[u8]) -> Completion<()> {
        let (done, completion) = completion::channel();
        if let Err(e) = self.run(ctx, inputs, object_id, &done) {
            warn!(error = %e, "TensorToPlasma failed");
            done.complete(Err(e));
        }
        completion
    }

    fn run(
        &self,
        ctx: &OpContext,
        inputs: &[Tensor],
        object_id: &[u8],
        done: &Completer<()>,
    ) -> BridgeResult<()> {
        let plan = self.plan(inputs, object_id)?;
        if self.session.device().is_some() {
            ctx.require_compute_stream()?;
        }

        let header_size = compute_header_size(plan.dtype, &plan.shape)?;
        let buffer = self.session.connection().create(&plan.id, header_size + plan.total_bytes())?;
        debug!(
            id = %plan.id,
            header_size,
            payload = plan.total_bytes(),
            inputs = inputs.len(),
            "object created"
        );

        self.fill_and_seal(ctx, inputs, &plan, buffer, done)
    }

    fn fill_and_seal(
        &self,
        ctx: &OpContext,
        inputs: &[Tensor],
        plan: &UploadPlan,
        buffer: MutableBuffer,
        done: &Completer<()>,
    ) -> BridgeResult<()> {
        let payload_offset = buffer.with_mut(|bytes| write_header(plan.dtype, &plan.shape, bytes))??;
        let engine = self.session.copy_engine(Direction::Upload)?;

        let pinned = PinnedRange::register(
            &self.session,
            buffer.address() + payload_offset,
            plan.total_bytes(),
        );
        if pinned.is_some() {
            engine
                .wait_for(ctx.require_compute_stream()?)
                .map_err(enqueue_failed)?;
        }

        let dst: Arc<dyn MemoryRegion> = Arc::new(WritableObject(buffer));
        for (input, offset) in inputs.iter().zip(&plan.offsets) {
            let src: Arc<dyn MemoryRegion> = Arc::new(input.storage().clone());
            engine
                .copy(CopyRequest::new(
                    Arc::clone(&dst),
                    payload_offset + offset,
                    src,
                    0,
                    input.total_bytes(),
                ))
                .map_err(enqueue_failed)?;
        }

        let session = Arc::clone(&self.session);
        let id = plan.id;
        let finish = done.clone();
        engine
            .on_complete(Box::new(move |status: DeviceResult<()>| {
                drop(pinned);
                let result = status
                    .map_err(|e| BridgeError::Internal(format!("payload copy failed: {e}")))
                    .and_then(|()| session.connection().seal(&id).map_err(BridgeError::from));
                match &result {
                    Ok(()) => debug!(%id, "object sealed"),
                    Err(e) => warn!(%id, error = %e, "payload copy failed, object left unsealed"),
                }
                finish.complete(result);
            }))
            .map_err(enqueue_failed)
    }
}

fn enqueue_failed(err: pb_device::DeviceError) -> BridgeError {
    BridgeError::Internal(format!("D2H memcpy failed to be enqueued: {err}"))
}
