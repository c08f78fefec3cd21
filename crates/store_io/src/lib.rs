//! SandStore I/O Layer
//!
//! Provides the primitives the task engine runs against:
//! - VirtualPath: normalized, separator-safe paths relative to a storage root
//! - LocalFile: a handle over one node of the backing store
//!
//! All higher-level semantics (error taxonomy, task orchestration) live in
//! `store_core`; this crate only touches the disk.

mod virtual_path;
mod local_file;

pub use virtual_path::VirtualPath;
pub use local_file::{is_cross_device_error, LocalFile};

use thiserror::Error;

/// I/O layer errors
#[derive(Error, Debug)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("Destination is not a directory: {0}")]
    DestinationNotDirectory(String),
}

pub type Result<T> = std::result::Result<T, FsError>;
