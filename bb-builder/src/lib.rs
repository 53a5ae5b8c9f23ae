//! # bb-builder: execution dispatch
//!
//! A [`BuildQueue`] accepts `Execute`, `WaitExecution` and `GetCapabilities`
//! calls. Three implementations exist:
//!
//! - [`NonExecutableBuildQueue`]: answers capability queries, refuses execution
//! - [`ForwardingBuildQueue`]: relays calls to a remote scheduler
//! - [`DemultiplexingBuildQueue`]: picks one of the above by instance name
//!
//! The [`InstanceRouter`] is the immutable table the demultiplexer consults.

mod build_queue;
mod demultiplexing;
mod forwarding;
mod non_executable;
pub mod router;

pub use build_queue::{BuildQueue, OperationStream};
pub use demultiplexing::{BuildQueueGetter, DemultiplexingBuildQueue};
pub use forwarding::ForwardingBuildQueue;
pub use non_executable::{NonExecutableBuildQueue, MAX_BATCH_TOTAL_SIZE_BYTES};
pub use router::{InstanceRouter, InstanceRouterBuilder};
