//! Create-directory task

use super::{FileSystemTask, TaskState};
use crate::channel::ResponseSink;
use crate::error::TaskError;
use crate::filesystem::{FileSystemOps, FileSystemWeakRef};
use crate::promise::{AbortableHandle, TaskValue};
use ipc_proto::{AccessType, ErrorCode, FileSystemRequest, FileSystemResponse};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use store_io::VirtualPath;
use uuid::Uuid;

pub struct CreateDirectoryTask {
    state: TaskState,
    target: VirtualPath,
    promise: Option<Arc<AbortableHandle>>,
}

impl CreateDirectoryTask {
    /// Local-origin task settling the given handle
    pub fn new(
        filesystem: FileSystemWeakRef,
        filesystem_name: String,
        request_id: Uuid,
        abort: Arc<AtomicBool>,
        target: VirtualPath,
        promise: Arc<AbortableHandle>,
    ) -> Self {
        Self {
            state: TaskState::local(filesystem, filesystem_name, request_id, abort),
            target,
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
        Self {
            state: TaskState::remote(filesystem, request_id, sink),
            target: VirtualPath::from_trusted(real_path),
            promise: None,
        }
    }
}

impl FileSystemTask for CreateDirectoryTask {
    fn kind(&self) -> &'static str {
        "create-directory"
    }

    fn state(&self) -> &TaskState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TaskState {
        &mut self.state
    }

    fn access_type(&self) -> AccessType {
        AccessType::Create
    }

    fn work(&mut self) -> Result<(), TaskError> {
        let filesystem = self.state.filesystem().ok_or(ErrorCode::Unknown)?;

        let file = filesystem
            .local_file(&self.target)
            .ok_or(ErrorCode::InvalidPath)?;
        if file.exists() {
            return Err(ErrorCode::PathExists.into());
        }
        file.create_dir()?;
        Ok(())
    }

    fn handler_callback(&mut self) {
        let Some(promise) = self.promise.take() else { return };
        if self.state.filesystem().is_none() {
            return;
        }
        match self.state.error() {
            Some(code) => promise.reject(code),
            None => promise.resolve(TaskValue::Directory(self.target.clone())),
        }
    }

    fn request_params(&self) -> FileSystemRequest {
        FileSystemRequest::CreateDirectory {
            filesystem: self.state.filesystem_name().to_string(),
            real_path: self.target.as_str().to_string(),
        }
    }

    fn success_response(&mut self) -> FileSystemResponse {
        FileSystemResponse::Directory {
            real_path: self.target.as_str().to_string(),
        }
    }

    fn set_success_response(&mut self, value: FileSystemResponse) {
        if let FileSystemResponse::Directory { real_path } = value {
            self.target = VirtualPath::from_trusted(real_path);
        }
    }
}
