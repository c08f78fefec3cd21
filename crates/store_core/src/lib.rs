//! SandStore Core - sandboxed-storage task engine
//!
//! Turns a caller-facing storage operation into a unit of work that runs on
//! a background worker pool in the privileged process, or is proxied over a
//! request channel when invoked from a sandboxed content process. Results
//! come back to a settle-once handle on the thread that started the
//! operation; long-running recursive operations support cooperative
//! cancellation and progress reporting.

pub mod channel;
pub mod config;
pub mod directory;
pub mod error;
pub mod executor;
pub mod filesystem;
pub mod promise;
pub mod task;

pub use channel::{
    request_channel, AllowAll, ChildEndpoint, ChildHalf, ParentEndpoint, ParentHalf,
    PermissionChecker,
};
pub use config::CoreConfig;
pub use directory::{Directory, MoveDestination, MoveSource, RemoveTarget};
pub use error::TaskError;
pub use executor::{EventQueue, EventSink, ProcessRole, WorkerPool};
pub use filesystem::{FileSystemOps, FileSystemWeakRef, StorageFileSystem, StorageRegistry};
pub use promise::{AbortableHandle, AbortableProgressHandle, HandleState, TaskValue};
pub use task::{ContentSource, FileSystemTask, TaskRunner, TaskState};
