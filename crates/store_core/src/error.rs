//! Error translation from raw I/O conditions to the caller-visible taxonomy
//!
//! Nothing below the task layer ever shows a platform error to a caller:
//! every failure is funneled through `TaskError::translate` before it is
//! stored in a task's error slot.

use ipc_proto::ErrorCode;
use store_io::FsError;
use thiserror::Error;

/// A raw task failure, prior to translation
#[derive(Debug, Error)]
pub enum TaskError {
    /// Already in the caller-visible taxonomy; passes through unchanged
    #[error("{0}")]
    Code(ErrorCode),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("filesystem failure: {0}")]
    Fs(#[from] FsError),
}

impl From<ErrorCode> for TaskError {
    fn from(code: ErrorCode) -> Self {
        TaskError::Code(code)
    }
}

impl TaskError {
    /// Map to the caller-visible taxonomy; total, with `Unknown` as the
    /// default bucket for unrecognized conditions.
    pub fn translate(&self) -> ErrorCode {
        match self {
            TaskError::Code(code) => *code,
            TaskError::Io(err) => translate_io(err),
            TaskError::Fs(err) => match err {
                FsError::InvalidPath(_) => ErrorCode::InvalidPath,
                FsError::NotDirectory(_) => ErrorCode::TypeMismatch,
                FsError::DestinationNotDirectory(_) => ErrorCode::InvalidModification,
                FsError::Io(err) => translate_io(err),
            },
        }
    }
}

fn translate_io(err: &std::io::Error) -> ErrorCode {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::NotFound => ErrorCode::NotFound,
        ErrorKind::AlreadyExists => ErrorCode::PathExists,
        ErrorKind::PermissionDenied | ErrorKind::DirectoryNotEmpty => {
            ErrorCode::NoModificationAllowed
        }
        ErrorKind::NotADirectory => ErrorCode::TypeMismatch,
        ErrorKind::InvalidInput => ErrorCode::InvalidPath,
        _ => ErrorCode::Unknown,
    }
}
