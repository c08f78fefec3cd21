//! Create-file task
//!
//! Writes caller-supplied content to a new file, or over an existing one
//! when `replace` is requested. Content comes either as an in-memory byte
//! array or as a lazily-read stream; the stream form stays in the
//! privileged process (a proxied request carries bytes).

use super::{FileSystemTask, TaskState};
use crate::channel::ResponseSink;
use crate::error::TaskError;
use crate::filesystem::{FileSystemOps, FileSystemWeakRef};
use crate::promise::{AbortableHandle, TaskValue};
use ipc_proto::{AccessType, ErrorCode, FileRef, FileSystemRequest, FileSystemResponse};
use std::io::{BufWriter, Read, Write};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use store_io::VirtualPath;
use uuid::Uuid;

/// Source of the file content
pub enum ContentSource {
    Bytes(Vec<u8>),
    Stream(Box<dyn Read + Send>),
}

pub struct CreateFileTask {
    state: TaskState,
    target: VirtualPath,
    content: ContentSource,
    replace: bool,
    buffer_size: usize,
    file: Option<FileRef>,
    promise: Option<Arc<AbortableHandle>>,
}

impl CreateFileTask {
    /// Local-origin task settling the given handle
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        filesystem: FileSystemWeakRef,
        filesystem_name: String,
        request_id: Uuid,
        abort: Arc<AtomicBool>,
        target: VirtualPath,
        content: ContentSource,
        replace: bool,
        buffer_size: usize,
        promise: Arc<AbortableHandle>,
    ) -> Self {
        Self {
            state: TaskState::local(filesystem, filesystem_name, request_id, abort),
            target,
            content,
            replace,
            buffer_size,
            file: None,
            promise: Some(promise),
        }
    }

    /// Task reconstructed from a channel request
    #[allow(clippy::too_many_arguments)]
    pub fn from_request(
        filesystem: &Arc<dyn FileSystemOps>,
        request_id: Uuid,
        real_path: String,
        data: Vec<u8>,
        replace: bool,
        buffer_size: usize,
        sink: ResponseSink,
    ) -> Self {
        Self {
            state: TaskState::remote(filesystem, request_id, sink),
            target: VirtualPath::from_trusted(real_path),
            content: ContentSource::Bytes(data),
            replace,
            buffer_size,
            file: None,
            promise: None,
        }
    }
}

impl FileSystemTask for CreateFileTask {
    fn kind(&self) -> &'static str {
        "create-file"
    }

    fn state(&self) -> &TaskState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TaskState {
        &mut self.state
    }

    fn access_type(&self) -> AccessType {
        if self.replace {
            AccessType::Write
        } else {
            AccessType::Create
        }
    }

    fn work(&mut self) -> Result<(), TaskError> {
        let filesystem = self.state.filesystem().ok_or(ErrorCode::Unknown)?;

        let file = filesystem
            .local_file(&self.target)
            .ok_or(ErrorCode::InvalidPath)?;
        if !filesystem.is_safe_file(&file) {
            return Err(ErrorCode::Security.into());
        }

        let output = if file.exists() {
            if !file.is_file() {
                return Err(ErrorCode::TypeMismatch.into());
            }
            if !self.replace {
                return Err(ErrorCode::PathExists.into());
            }
            file.open_truncate()?
        } else {
            file.create_file_exclusive()?
        };

        // The stream closes on drop on every exit path below.
        let mut writer = BufWriter::with_capacity(self.buffer_size, output);
        match &mut self.content {
            ContentSource::Bytes(bytes) => {
                let written = writer.write(bytes)?;
                if written != bytes.len() {
                    return Err(ErrorCode::Unknown.into());
                }
            }
            ContentSource::Stream(reader) => {
                std::io::copy(reader, &mut writer)?;
            }
        }
        writer.flush()?;

        self.file = Some(filesystem.vend_file_ref(&self.target));
        Ok(())
    }

    fn handler_callback(&mut self) {
        let Some(promise) = self.promise.take() else { return };
        if self.state.filesystem().is_none() {
            return;
        }
        match self.state.error() {
            Some(code) => promise.reject(code),
            None => match self.file {
                Some(file) => promise.resolve(TaskValue::File(file)),
                None => promise.reject(ErrorCode::Unknown),
            },
        }
    }

    fn request_params(&self) -> FileSystemRequest {
        let data = match &self.content {
            ContentSource::Bytes(bytes) => bytes.clone(),
            ContentSource::Stream(_) => {
                // Stream sources are drained to bytes before a task is
                // proxied; reaching this means the caller skipped that.
                tracing::warn!("Proxying a stream-sourced create-file as empty content");
                Vec::new()
            }
        };
        FileSystemRequest::CreateFile {
            filesystem: self.state.filesystem_name().to_string(),
            real_path: self.target.as_str().to_string(),
            data,
            replace: self.replace,
        }
    }

    fn success_response(&mut self) -> FileSystemResponse {
        match self.file {
            Some(file) => FileSystemResponse::File { file },
            None => FileSystemResponse::Error { code: ErrorCode::Unknown },
        }
    }

    fn set_success_response(&mut self, value: FileSystemResponse) {
        if let FileSystemResponse::File { file } = value {
            self.file = Some(file);
        }
    }
}
