//! IPC Protocol definitions for content <-> privileged process communication
//!
//! This crate defines the shared data structures and protocol for the
//! filesystem request channel: one request per operation, one response per
//! request, plus out-of-band notify and control messages usable while a
//! request is outstanding. Frames are bincode-encoded byte vectors; the
//! transport that carries them is out of scope here.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Caller-visible error taxonomy
///
/// Every raw I/O failure is translated into one of these before it reaches
/// a caller; the absence of an error is modeled as `Option::None`, never as
/// a member of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ErrorCode {
    #[error("invalid path")]
    InvalidPath,
    #[error("invalid modification")]
    InvalidModification,
    #[error("no modification allowed")]
    NoModificationAllowed,
    #[error("not found")]
    NotFound,
    #[error("path exists")]
    PathExists,
    #[error("type mismatch")]
    TypeMismatch,
    #[error("security error")]
    Security,
    #[error("aborted")]
    Aborted,
    #[error("unknown error")]
    Unknown,
}

/// Permission access class of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessType {
    Read,
    Write,
    Create,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Read => "read",
            AccessType::Write => "write",
            AccessType::Create => "create",
        }
    }
}

impl std::fmt::Display for AccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle to a previously-vended file result
///
/// The privileged process keeps the id -> path mapping; the content process
/// only ever sees the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    pub id: Uuid,
}

impl FileRef {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }
}

impl Default for FileRef {
    fn default() -> Self {
        Self::new()
    }
}

/// An operation target given either as a path or as a vended file handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PathOrRef {
    Path(String),
    Ref(FileRef),
}

/// One entry surfaced by an enumeration pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub path: String,
    pub is_dir: bool,
}

/// Requests sent from the content process to the privileged process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FileSystemRequest {
    CreateDirectory {
        filesystem: String,
        real_path: String,
    },
    CreateFile {
        filesystem: String,
        real_path: String,
        data: Vec<u8>,
        replace: bool,
    },
    Move {
        filesystem: String,
        directory: String,
        src: PathOrRef,
        dest_directory: String,
        dest_name: Option<String>,
    },
    Remove {
        filesystem: String,
        directory: String,
        target: PathOrRef,
        recursive: bool,
    },
    Enumerate {
        filesystem: String,
        directory: String,
        target: String,
        recursive: bool,
    },
    GetFileOrDirectory {
        filesystem: String,
        real_path: String,
    },
}

impl FileSystemRequest {
    /// Canonical string of the filesystem this request targets
    pub fn filesystem(&self) -> &str {
        match self {
            FileSystemRequest::CreateDirectory { filesystem, .. }
            | FileSystemRequest::CreateFile { filesystem, .. }
            | FileSystemRequest::Move { filesystem, .. }
            | FileSystemRequest::Remove { filesystem, .. }
            | FileSystemRequest::Enumerate { filesystem, .. }
            | FileSystemRequest::GetFileOrDirectory { filesystem, .. } => filesystem,
        }
    }
}

/// Responses from the privileged process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FileSystemResponse {
    Error { code: ErrorCode },
    Directory { real_path: String },
    File { file: FileRef },
    Boolean { success: bool },
}

/// Out-of-band progress payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyValue {
    /// A completed move step, identified by its source path
    Path(String),
    /// One enumerated directory level
    Entries(Vec<EntryInfo>),
}

/// Control messages for an outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Best-effort cancellation; the remote side may complete first
    Abort,
    /// Consumer is ready for the next enumeration level
    NextEnumerate,
}

/// Frames traveling content -> privileged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChildMessage {
    Request { id: Uuid, params: FileSystemRequest },
    Control { id: Uuid, message: ControlMessage },
}

/// Frames traveling privileged -> content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParentMessage {
    Response { id: Uuid, value: FileSystemResponse },
    Notify { id: Uuid, value: NotifyValue },
}

/// Codec errors for channel frames
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Encode a frame for the wire
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtoError> {
    Ok(bincode::serialize(message)?)
}

/// Decode a frame from the wire
pub fn decode<'a, T: Deserialize<'a>>(frame: &'a [u8]) -> Result<T, ProtoError> {
    Ok(bincode::deserialize(frame)?)
}
