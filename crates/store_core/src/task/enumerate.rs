//! Enumerate task
//!
//! Lists a directory one level at a time, surfacing each level as a
//! progress batch. Recursive descent is paced to the consumer: after
//! draining a level the worker parks on the gate until the consumer signals
//! readiness for the next one. This deliberately ties up one worker per
//! slow consumer; the pool is sized for it.

use super::{FileSystemTask, ProgressRoute, TaskState};
use crate::channel::ResponseSink;
use crate::error::TaskError;
use crate::filesystem::{FileSystemOps, FileSystemWeakRef};
use crate::promise::{AbortableProgressHandle, TaskValue};
use ipc_proto::{
    AccessType, EntryInfo, ErrorCode, FileSystemRequest, FileSystemResponse, NotifyValue,
};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use store_io::{LocalFile, VirtualPath};
use uuid::Uuid;

/// Wait/notify handshake pacing a recursive enumeration
///
/// The worker parks between levels; `release_next` banks one level of
/// consumer readiness, `wake` rouses a parked worker after the abort flag
/// has been stored. Signals are counted so a consumer may run ahead of the
/// worker without losing wakeups.
pub struct EnumerationGate {
    pending_next: Mutex<usize>,
    cond: Condvar,
}

impl EnumerationGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { pending_next: Mutex::new(0), cond: Condvar::new() })
    }

    /// Consumer is ready for one more level
    pub fn release_next(&self) {
        let mut pending = self.pending_next.lock();
        *pending += 1;
        self.cond.notify_all();
    }

    /// Wake a parked worker; store the abort flag before calling this
    pub fn wake(&self) {
        let _pending = self.pending_next.lock();
        self.cond.notify_all();
    }

    /// Park until a level is released or the abort flag is set
    fn wait_for_next(&self, abort: &AtomicBool) -> Result<(), TaskError> {
        let mut pending = self.pending_next.lock();
        loop {
            if abort.load(Ordering::SeqCst) {
                return Err(ErrorCode::Aborted.into());
            }
            if *pending > 0 {
                *pending -= 1;
                return Ok(());
            }
            self.cond.wait(&mut pending);
        }
    }
}

pub struct EnumerateTask {
    state: TaskState,
    dir_path: VirtualPath,
    target: VirtualPath,
    recursive: bool,
    gate: Arc<EnumerationGate>,
    route: ProgressRoute,
    promise: Option<Arc<AbortableProgressHandle>>,
}

impl EnumerateTask {
    /// Local-origin task settling the given progress handle
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        filesystem: FileSystemWeakRef,
        filesystem_name: String,
        request_id: Uuid,
        abort: Arc<AtomicBool>,
        dir_path: VirtualPath,
        target: VirtualPath,
        recursive: bool,
        gate: Arc<EnumerationGate>,
        route: ProgressRoute,
        promise: Arc<AbortableProgressHandle>,
    ) -> Self {
        Self {
            state: TaskState::local(filesystem, filesystem_name, request_id, abort),
            dir_path,
            target,
            recursive,
            gate,
            route,
            promise: Some(promise),
        }
    }

    /// Task reconstructed from a channel request
    pub fn from_request(
        filesystem: &Arc<dyn FileSystemOps>,
        request_id: Uuid,
        directory: String,
        target: String,
        recursive: bool,
        sink: ResponseSink,
    ) -> Self {
        let route = ProgressRoute::Remote { sink: sink.clone() };
        Self {
            state: TaskState::remote(filesystem, request_id, sink),
            dir_path: VirtualPath::from_trusted(directory),
            target: VirtualPath::from_trusted(target),
            recursive,
            gate: EnumerationGate::new(),
            route,
            promise: None,
        }
    }

    /// The pacing gate, for the channel's control plumbing
    pub fn gate(&self) -> Arc<EnumerationGate> {
        self.gate.clone()
    }

    /// List one directory level, surface it, and return its subdirectories
    fn enumerate_level(
        &self,
        dir: &LocalFile,
        dir_virtual: &VirtualPath,
    ) -> Result<Vec<(LocalFile, VirtualPath)>, TaskError> {
        let mut entries = Vec::new();
        let mut subdirs = Vec::new();

        for child in dir.children()? {
            self.state.check_abort()?;
            let Some(child_virtual) = dir_virtual.join_name(&child.leaf_name()) else {
                continue;
            };
            let is_dir = child.is_dir();
            entries.push(EntryInfo { path: child_virtual.as_str().to_string(), is_dir });
            if is_dir {
                subdirs.push((child, child_virtual));
            }
        }

        self.route.notify(NotifyValue::Entries(entries));
        Ok(subdirs)
    }
}

impl FileSystemTask for EnumerateTask {
    fn kind(&self) -> &'static str {
        "enumerate"
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

        if self.target != self.dir_path && !self.target.is_descendant_of(&self.dir_path) {
            return Err(ErrorCode::NoModificationAllowed.into());
        }

        let src = filesystem
            .local_file(&self.target)
            .ok_or(ErrorCode::InvalidPath)?;
        if !src.exists() {
            return Err(ErrorCode::NotFound.into());
        }
        if !src.is_dir() {
            return Err(ErrorCode::TypeMismatch.into());
        }

        let target = self.target.clone();
        let mut queue: VecDeque<(LocalFile, VirtualPath)> =
            self.enumerate_level(&src, &target)?.into();

        let abort = self.state.abort_flag();
        while self.recursive && !queue.is_empty() {
            // Pace to the consumer: park until the current batch is consumed
            self.gate.wait_for_next(&abort)?;
            let (dir, dir_virtual) = queue.pop_front().expect("queue checked non-empty");
            queue.extend(self.enumerate_level(&dir, &dir_virtual)?);
        }
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
        FileSystemRequest::Enumerate {
            filesystem: self.state.filesystem_name().to_string(),
            directory: self.dir_path.as_str().to_string(),
            target: self.target.as_str().to_string(),
            recursive: self.recursive,
        }
    }

    fn success_response(&mut self) -> FileSystemResponse {
        FileSystemResponse::Boolean { success: true }
    }

    fn set_success_response(&mut self, _value: FileSystemResponse) {
        // The enumeration result carries no payload; entries arrived as
        // progress notifications
    }

    fn handler_notify(&self, value: &NotifyValue) {
        if let Some(promise) = &self.promise {
            promise.notify_progress(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_gate_banks_signals() {
        let gate = EnumerationGate::new();
        let abort = AtomicBool::new(false);

        gate.release_next();
        gate.release_next();

        gate.wait_for_next(&abort).unwrap();
        gate.wait_for_next(&abort).unwrap();
    }

    #[test]
    fn test_gate_abort_wakes_parked_worker() {
        let gate = EnumerationGate::new();
        let abort = Arc::new(AtomicBool::new(false));

        let worker_gate = gate.clone();
        let worker_abort = abort.clone();
        let worker = std::thread::spawn(move || worker_gate.wait_for_next(&worker_abort));

        std::thread::sleep(Duration::from_millis(50));
        abort.store(true, Ordering::SeqCst);
        gate.wake();

        let result = worker.join().unwrap();
        assert_eq!(result.unwrap_err().translate(), ErrorCode::Aborted);
    }

    #[test]
    fn test_gate_release_wakes_parked_worker() {
        let gate = EnumerationGate::new();
        let abort = Arc::new(AtomicBool::new(false));

        let worker_gate = gate.clone();
        let worker_abort = abort.clone();
        let worker = std::thread::spawn(move || worker_gate.wait_for_next(&worker_abort));

        std::thread::sleep(Duration::from_millis(50));
        gate.release_next();

        assert!(worker.join().unwrap().is_ok());
    }
}
