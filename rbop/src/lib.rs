//! Reliable Background Operation Processor.
//!
//! A durable, single-consumer work queue that serializes filesystem-
//! change notifications from a virtual-filesystem driver back into the
//! Git index/working-tree state, surviving process crashes and
//! coordinating exclusive access to a shared [`GitLock`].

pub mod acquisition;
pub mod fatal;
pub mod lock;
pub mod operation;
pub mod processor;
pub mod retry;
pub mod store;
mod wakeup;

pub use acquisition::AcquisitionLock;
pub use lock::GitLock;
pub use operation::{BackgroundOperation, CallbackResult, OperationId, OperationKind};
pub use processor::{Callbacks, Processor, ProcessorTelemetry};
pub use store::{DurableStore, SledStore, StoreError as Error};
