//! Move task
//!
//! A single rename where the backing store allows it; a directory move that
//! crosses volumes falls back to copy-then-remove with an abort checkpoint
//! between children. Aborting partway leaves a partially-moved tree - the
//! operation reports Aborted and performs no rollback.

use super::{FileSystemTask, ProgressRoute, TaskState};
use crate::channel::ResponseSink;
use crate::error::TaskError;
use crate::filesystem::{FileSystemOps, FileSystemWeakRef};
use crate::promise::{AbortableProgressHandle, TaskValue};
use ipc_proto::{
    AccessType, ErrorCode, FileSystemRequest, FileSystemResponse, NotifyValue, PathOrRef,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use store_io::{is_cross_device_error, LocalFile, VirtualPath};
use uuid::Uuid;

pub struct MoveTask {
    state: TaskState,
    dir_path: VirtualPath,
    src: PathOrRef,
    dest_directory: VirtualPath,
    dest_name: Option<String>,
    route: ProgressRoute,
    promise: Option<Arc<AbortableProgressHandle>>,
}

impl MoveTask {
    /// Local-origin task settling the given progress handle
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        filesystem: FileSystemWeakRef,
        filesystem_name: String,
        request_id: Uuid,
        abort: Arc<AtomicBool>,
        dir_path: VirtualPath,
        src: PathOrRef,
        dest_directory: VirtualPath,
        dest_name: Option<String>,
        route: ProgressRoute,
        promise: Arc<AbortableProgressHandle>,
    ) -> Self {
        Self {
            state: TaskState::local(filesystem, filesystem_name, request_id, abort),
            dir_path,
            src,
            dest_directory,
            dest_name,
            route,
            promise: Some(promise),
        }
    }

    /// Task reconstructed from a channel request
    #[allow(clippy::too_many_arguments)]
    pub fn from_request(
        filesystem: &Arc<dyn FileSystemOps>,
        request_id: Uuid,
        directory: String,
        src: PathOrRef,
        dest_directory: String,
        dest_name: Option<String>,
        sink: ResponseSink,
    ) -> Self {
        let route = ProgressRoute::Remote { sink: sink.clone() };
        Self {
            state: TaskState::remote(filesystem, request_id, sink),
            dir_path: VirtualPath::from_trusted(directory),
            src,
            dest_directory: VirtualPath::from_trusted(dest_directory),
            dest_name,
            route,
            promise: None,
        }
    }
}

impl FileSystemTask for MoveTask {
    fn kind(&self) -> &'static str {
        "move"
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
        let src_path = match &self.src {
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

        let src_file = filesystem
            .local_file(&src_path)
            .ok_or(ErrorCode::InvalidPath)?;
        if !src_file.exists() {
            return Err(ErrorCode::NotFound.into());
        }

        let is_directory = src_file.is_dir();
        let is_file = src_file.is_file();
        if !is_directory && !is_file {
            return Err(ErrorCode::TypeMismatch.into());
        }
        if is_file && !filesystem.is_safe_file(&src_file) {
            return Err(ErrorCode::Security.into());
        }

        // If no destination name was passed, use the source name
        let dest_name = self
            .dest_name
            .clone()
            .unwrap_or_else(|| src_path.leaf_name().to_string());
        let dest_path = self
            .dest_directory
            .join_name(&dest_name)
            .ok_or(ErrorCode::InvalidPath)?;

        let dest_file = filesystem
            .local_file(&dest_path)
            .ok_or(ErrorCode::InvalidPath)?;
        if dest_file.exists() {
            return Err(ErrorCode::PathExists.into());
        }
        if is_file && !filesystem.is_safe_file(&dest_file) {
            return Err(ErrorCode::Security.into());
        }

        match src_file.rename_to(&dest_file) {
            Ok(()) => {}
            Err(err) if is_cross_device_error(&err) => {
                tracing::info!(
                    "Cross-device move, using copy+remove: {} -> {}",
                    src_path,
                    dest_path
                );
                let abort = self.state.abort_flag();
                if is_directory {
                    copy_tree(&src_file, &dest_file, &abort)?;
                } else {
                    src_file.copy_file_to(&dest_file)?;
                }
                self.state.check_abort()?;
                src_file.remove(true)?;
            }
            Err(err) => return Err(err.into()),
        }

        self.route
            .notify(NotifyValue::Path(src_path.as_str().to_string()));
        Ok(())
    }

    fn handler_callback(&mut self) {
        let Some(promise) = self.promise.take() else { return };
        if self.state.filesystem().is_none() {
            return;
        }
        match self.state.error() {
            Some(code) => promise.reject(code),
            None => promise.resolve(TaskValue::Void),
        }
    }

    fn request_params(&self) -> FileSystemRequest {
        FileSystemRequest::Move {
            filesystem: self.state.filesystem_name().to_string(),
            directory: self.dir_path.as_str().to_string(),
            src: self.src.clone(),
            dest_directory: self.dest_directory.as_str().to_string(),
            dest_name: self.dest_name.clone(),
        }
    }

    fn success_response(&mut self) -> FileSystemResponse {
        FileSystemResponse::Boolean { success: true }
    }

    fn set_success_response(&mut self, _value: FileSystemResponse) {
        // The move result carries no payload
    }

    fn handler_notify(&self, value: &NotifyValue) {
        if let Some(promise) = &self.promise {
            promise.notify_progress(value);
        }
    }
}

/// Recursive copy with an abort checkpoint between children
///
/// An abort partway through leaves already-copied children in place.
fn copy_tree(src: &LocalFile, dst: &LocalFile, abort: &AtomicBool) -> Result<(), TaskError> {
    if !dst.exists() {
        dst.create_dir_all()?;
    }
    for child in src.children()? {
        if abort.load(Ordering::SeqCst) {
            return Err(ErrorCode::Aborted.into());
        }
        let dst_child = LocalFile::new(dst.path().join(child.leaf_name()));
        if child.is_dir() {
            copy_tree(&child, &dst_child, abort)?;
        } else {
            child.copy_file_to(&dst_child)?;
        }
    }
    Ok(())
}
