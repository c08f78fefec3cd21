//! Remove task
//!
//! Removing an absent target is not an error: the task succeeds with a
//! boolean `false` result.

use super::{FileSystemTask, TaskState};
use crate::channel::ResponseSink;
use crate::error::TaskError;
use crate::filesystem::{FileSystemOps, FileSystemWeakRef};
use crate::promise::{AbortableHandle, TaskValue};
use ipc_proto::{AccessType, ErrorCode, FileSystemRequest, FileSystemResponse, PathOrRef};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use store_io::VirtualPath;
use uuid::Uuid;

pub struct RemoveTask {
    state: TaskState,
    dir_path: VirtualPath,
    target: PathOrRef,
    recursive: bool,
    return_value: bool,
    promise: Option<Arc<AbortableHandle>>,
}

impl RemoveTask {
    /// Local-origin task settling the given handle
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        filesystem: FileSystemWeakRef,
        filesystem_name: String,
        request_id: Uuid,
        abort: Arc<AtomicBool>,
        dir_path: VirtualPath,
        target: PathOrRef,
        recursive: bool,
        promise: Arc<AbortableHandle>,
    ) -> Self {
        Self {
            state: TaskState::local(filesystem, filesystem_name, request_id, abort),
            dir_path,
            target,
            recursive,
            return_value: false,
            promise: Some(promise),
        }
    }

    /// Task reconstructed from a channel request
    pub fn from_request(
        filesystem: &Arc<dyn FileSystemOps>,
        request_id: Uuid,
        directory: String,
        target: PathOrRef,
        recursive: bool,
        sink: ResponseSink,
    ) -> Self {
        Self {
            state: TaskState::remote(filesystem, request_id, sink),
            dir_path: VirtualPath::from_trusted(directory),
            target,
            recursive,
            return_value: false,
            promise: None,
        }
    }
}

impl FileSystemTask for RemoveTask {
    fn kind(&self) -> &'static str {
        "remove"
    }

    fn state(&self) -> &TaskState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TaskState {
        &mut self.state
    }

    fn access_type(&self) -> AccessType {
        AccessType::Write
    }

    fn work(&mut self) -> Result<(), TaskError> {
        let filesystem = self.state.filesystem().ok_or(ErrorCode::Unknown)?;

        // A vended handle must resolve to a path inside the scoping
        // directory before any path-based step runs.
        let target_path = match &self.target {
            PathOrRef::Path(path) => VirtualPath::from_trusted(path.clone()),
            PathOrRef::Ref(file_ref) => {
                let path = filesystem
                    .resolve_file_ref(file_ref)
                    .ok_or(ErrorCode::Security)?;
                if !path.is_descendant_of(&self.dir_path) {
                    return Err(ErrorCode::NoModificationAllowed.into());
                }
                path
            }
        };

        let file = filesystem
            .local_file(&target_path)
            .ok_or(ErrorCode::InvalidPath)?;

        if !file.exists() {
            self.return_value = false;
            return Ok(());
        }

        if file.is_file() && !filesystem.is_safe_file(&file) {
            return Err(ErrorCode::Security.into());
        }

        file.remove(self.recursive)?;
        self.return_value = true;
        Ok(())
    }

    fn handler_callback(&mut self) {
        let Some(promise) = self.promise.take() else { return };
        if self.state.filesystem().is_none() {
            return;
        }
        match self.state.error() {
            Some(code) => promise.reject(code),
            None => promise.resolve(TaskValue::Boolean(self.return_value)),
        }
    }

    fn request_params(&self) -> FileSystemRequest {
        FileSystemRequest::Remove {
            filesystem: self.state.filesystem_name().to_string(),
            directory: self.dir_path.as_str().to_string(),
            target: self.target.clone(),
            recursive: self.recursive,
        }
    }

    fn success_response(&mut self) -> FileSystemResponse {
        FileSystemResponse::Boolean { success: self.return_value }
    }

    fn set_success_response(&mut self, value: FileSystemResponse) {
        if let FileSystemResponse::Boolean { success } = value {
            self.return_value = success;
        }
    }
}
