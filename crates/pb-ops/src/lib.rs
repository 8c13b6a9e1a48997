//! PlasmaBridge transfer operations.
//!
//! [`UploadOp`] (`TensorToPlasma`) packs N same-dtype tensors into one sealed
//! store object behind a shape/dtype header. [`DownloadOp`]
//! (`PlasmaToTensor`) fetches an object and materializes it as a tensor.
//! Both run through a [`BridgeSession`], which owns the store connection,
//! the optional device context, and one copy stream per direction.
//!
//! ```text
//! upload:   validate -> create -> write header -> copy payload -> seal -> complete
//! download: get -> read header -> allocate output -> copy payload -> complete
//! ```
//!
//! On a device session copies are ordered against the caller's compute
//! stream in both directions, and completion is reported from the device
//! event manager once the copies have finished.

pub mod completion;
pub mod config;
pub mod context;
pub mod download;
pub mod error;
mod region;
pub mod session;
pub mod signature;
pub mod upload;

pub use completion::{Completer, Completion};
pub use config::{BridgeConfig, OpAttrs, StoreBackend};
pub use context::OpContext;
pub use download::DownloadOp;
pub use error::{BridgeError, BridgeResult, StatusCode};
pub use session::{BridgeSession, Direction};
pub use signature::{ArgDef, AttrDef, OpDef, PLASMA_TO_TENSOR, TENSOR_TO_PLASMA};
pub use upload::{UploadOp, UploadPlan};
