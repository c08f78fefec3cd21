//! Get-file-or-directory task
//!
//! Resolves a path to either a directory reference or a vended file handle.
//! The empty path is the area root, which is created on first access
//! instead of failing - intentional lazy initialization of the root only.

use super::{FileSystemTask, TaskState};
use crate::channel::ResponseSink;
use crate::error::TaskError;
use crate::filesystem::{FileSystemOps, FileSystemWeakRef};
use crate::promise::{AbortableHandle, TaskValue};
use ipc_proto::{AccessType, ErrorCode, FileRef, FileSystemRequest, FileSystemResponse};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use store_io::VirtualPath;
use uuid::Uuid;

pub struct GetFileOrDirectoryTask {
    state: TaskState,
    target: VirtualPath,
    directory_only: bool,
    is_directory: bool,
    file: Option<FileRef>,
    promise: Option<Arc<AbortableHandle>>,
}

impl GetFileOrDirectoryTask {
    /// Local-origin task settling the given handle
    pub fn new(
        filesystem: FileSystemWeakRef,
        filesystem_name: String,
        request_id: Uuid,
        abort: Arc<AtomicBool>,
        target: VirtualPath,
        directory_only: bool,
        promise: Arc<AbortableHandle>,
    ) -> Self {
        Self {
            state: TaskState::local(filesystem, filesystem_name, request_id, abort),
            target,
            directory_only,
            is_directory: false,
            file: None,
            promise: Some(promise),
        }
    }

    /// Task reconstructed from a channel request
    pub fn from_request(
        filesystem: &Arc<dyn FileSystemOps>,
        request_id: Uuid,
        real_path: String,
        sink: ResponseSink,
    ) -> Self {
        let target = VirtualPath::from_trusted(real_path);
        let directory_only = target.is_root();
        Self {
            state: TaskState::remote(filesystem, request_id, sink),
            target,
            directory_only,
            is_directory: false,
            file: None,
            promise: None,
        }
    }
}

impl FileSystemTask for GetFileOrDirectoryTask {
    fn kind(&self) -> &'static str {
        "get-file-or-directory"
    }

    fn state(&self) -> &TaskState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TaskState {
        &mut self.state
    }

    fn access_type(&self) -> AccessType {
        AccessType::Read
    }

    fn work(&mut self) -> Result<(), TaskError> {
        let filesystem = self.state.filesystem().ok_or(ErrorCode::Unknown)?;

        let get_root = self.target.is_root();
        let file = filesystem
            .local_file(&self.target)
            .ok_or(ErrorCode::InvalidPath)?;

        if !file.exists() {
            if !get_root {
                return Err(ErrorCode::NotFound.into());
            }
            // Absent root is created, not reported
            file.create_dir_all()?;
        }

        self.is_directory = file.is_dir();
        if !self.is_directory {
            if self.directory_only {
                return Err(ErrorCode::TypeMismatch.into());
            }
            if !file.is_file() {
                // Neither directory nor file
                return Err(ErrorCode::TypeMismatch.into());
            }
            self.file = Some(filesystem.vend_file_ref(&self.target));
        }
        Ok(())
    }

    fn handler_callback(&mut self) {
        let Some(promise) = self.promise.take() else { return };
        if self.state.filesystem().is_none() {
            return;
        }
        if let Some(code) = self.state.error() {
            promise.reject(code);
            return;
        }
        if self.is_directory {
            promise.resolve(TaskValue::Directory(self.target.clone()));
        } else {
            match self.file {
                Some(file) => promise.resolve(TaskValue::File(file)),
                None => promise.reject(ErrorCode::Unknown),
            }
        }
    }

    fn request_params(&self) -> FileSystemRequest {
        FileSystemRequest::GetFileOrDirectory {
            filesystem: self.state.filesystem_name().to_string(),
            real_path: self.target.as_str().to_string(),
        }
    }

    fn success_response(&mut self) -> FileSystemResponse {
        if self.is_directory {
            return FileSystemResponse::Directory {
                real_path: self.target.as_str().to_string(),
            };
        }
        match self.file {
            Some(file) => FileSystemResponse::File { file },
            None => FileSystemResponse::Error { code: ErrorCode::Unknown },
        }
    }

    fn set_success_response(&mut self, value: FileSystemResponse) {
        match value {
            FileSystemResponse::Directory { real_path } => {
                self.target = VirtualPath::from_trusted(real_path);
                self.is_directory = true;
            }
            FileSystemResponse::File { file } => {
                self.file = Some(file);
                self.is_directory = false;
            }
            _ => {}
        }
    }
}
