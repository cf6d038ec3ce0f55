//! xfer-reconciler: drives managed file-transfer servers to their desired state.
//!
//! The reconciler is invoked repeatedly by an outer framework. Each invocation
//! performs one unit of work against the control plane and returns a
//! [`StepResult`]: complete, in progress (re-invoke after a delay with the
//! returned context), or failed with a classified error.
//!
//! - `stabilize`: lifecycle state machine (OFFLINE/STARTING/ONLINE/...)
//! - `classify`: error classification and retry budget
//! - `tags`: tag merging and diffing
//! - `network`: security group and address allocation planning
//! - `reconciler`: create, update, delete and read flows

pub mod classify;
pub mod clients;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod network;
pub mod reconciler;
pub mod stabilize;
pub mod step;
pub mod tags;
pub mod validation;

pub use clients::{InMemoryServerApi, ServerApi};
pub use config::ReconcilerConfig;
pub use context::{Phase, ReconciliationContext};
pub use error::{ErrorKind, Failure, RemoteError};
pub use model::{LifecycleState, ServerSpec};
pub use reconciler::{ResourceRequest, ServerReconciler};
pub use step::StepResult;
