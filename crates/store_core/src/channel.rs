//! Request channel - the cross-process actor pair
//!
//! The content process serializes a task into a request frame; the
//! privileged process reconstructs an equivalent task bound to a response
//! sink, permission-checks it, and runs it. Responses and out-of-band
//! notifications travel back the other way. A peer that has gone away is
//! never an error: frames to it are dropped silently.

use crate::filesystem::{FileSystemOps, StorageRegistry};
use crate::task::{
    CreateDirectoryTask, CreateFileTask, EnumerateTask, EnumerationGate, FileSystemTask,
    GetFileOrDirectoryTask, MoveTask, RemoveTask, TaskRunner,
};
use crate::executor::EventSink;
use crossbeam_channel::{bounded, Receiver, Sender};
use dashmap::DashMap;
use ipc_proto::{
    ChildMessage, ControlMessage, ErrorCode, FileSystemRequest, FileSystemResponse, NotifyValue,
    ParentMessage,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Decides whether a cross-process task may run
///
/// Consulted once per request with the combined name
/// `"{permission_name}-{access_type}"`.
pub trait PermissionChecker: Send + Sync {
    fn check(&self, permission: &str) -> bool;
}

/// Grants everything; the default for trusted embedders
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn check(&self, _permission: &str) -> bool {
        true
    }
}

/// Transport half held by the content process
pub struct ChildHalf {
    pub(crate) tx: Sender<Vec<u8>>,
    pub(crate) rx: Receiver<Vec<u8>>,
}

/// Transport half held by the privileged process
pub struct ParentHalf {
    pub(crate) tx: Sender<Vec<u8>>,
    pub(crate) rx: Receiver<Vec<u8>>,
}

/// Create a connected pair of frame transports
pub fn request_channel(capacity: usize) -> (ChildHalf, ParentHalf) {
    let (child_tx, parent_rx) = bounded(capacity);
    let (parent_tx, child_rx) = bounded(capacity);
    (
        ChildHalf { tx: child_tx, rx: child_rx },
        ParentHalf { tx: parent_tx, rx: parent_rx },
    )
}

/// Where a remote-bound task's result goes
///
/// Cloneable so the progress route and the completion path can both hold
/// one; sending the response also retires the request's control entry.
#[derive(Clone)]
pub struct ResponseSink {
    tx: Sender<Vec<u8>>,
    id: Uuid,
    controls: Arc<DashMap<Uuid, TaskControl>>,
}

impl ResponseSink {
    fn new(tx: Sender<Vec<u8>>, id: Uuid, controls: Arc<DashMap<Uuid, TaskControl>>) -> Self {
        Self { tx, id, controls }
    }

    pub fn send_response(&self, value: FileSystemResponse) {
        self.controls.remove(&self.id);
        match ipc_proto::encode(&ParentMessage::Response { id: self.id, value }) {
            Ok(frame) => {
                if self.tx.send(frame).is_err() {
                    tracing::debug!("Peer gone, dropping response for {}", self.id);
                }
            }
            Err(err) => tracing::warn!("Failed to encode response: {}", err),
        }
    }

    pub fn send_notify(&self, value: NotifyValue) {
        match ipc_proto::encode(&ParentMessage::Notify { id: self.id, value }) {
            Ok(frame) => {
                if self.tx.send(frame).is_err() {
                    tracing::debug!("Peer gone, dropping notification for {}", self.id);
                }
            }
            Err(err) => tracing::warn!("Failed to encode notification: {}", err),
        }
    }
}

/// Control state for one in-flight remote task
struct TaskControl {
    /// Keeps the checked-out capability alive for the task's lifetime
    _filesystem: Arc<dyn FileSystemOps>,
    abort: Arc<AtomicBool>,
    gate: Option<Arc<EnumerationGate>>,
}

/// Content-process endpoint: sends requests, pumps responses
pub struct ChildEndpoint {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: Mutex<HashMap<Uuid, Box<dyn FileSystemTask>>>,
}

impl ChildEndpoint {
    pub fn new(half: ChildHalf) -> Arc<Self> {
        Arc::new(Self {
            tx: half.tx,
            rx: half.rx,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Serialize a task and park it until the response arrives
    pub(crate) fn send_request(&self, task: Box<dyn FileSystemTask>, owning: &EventSink) {
        let id = task.state().request_id();
        let params = task.request_params();
        let frame = match ipc_proto::encode(&ChildMessage::Request { id, params }) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!("Failed to encode request: {}", err);
                let mut task = task;
                task.state_mut().set_error(ErrorCode::Unknown);
                owning.post(move || {
                    let mut task = task;
                    task.handler_callback();
                });
                return;
            }
        };

        self.pending.lock().insert(id, task);
        if self.tx.send(frame).is_err() {
            tracing::warn!("Request channel torn down, failing task locally");
            if let Some(mut task) = self.pending.lock().remove(&id) {
                task.state_mut().set_error(ErrorCode::Unknown);
                owning.post(move || {
                    let mut task = task;
                    task.handler_callback();
                });
            }
        }
    }

    /// Fire-and-forget control message for an outstanding request
    pub fn send_control(&self, id: Uuid, message: ControlMessage) {
        match ipc_proto::encode(&ChildMessage::Control { id, message }) {
            Ok(frame) => {
                if self.tx.send(frame).is_err() {
                    tracing::debug!("Channel gone, dropping control message for {}", id);
                }
            }
            Err(err) => tracing::warn!("Failed to encode control message: {}", err),
        }
    }

    /// Process queued responses and notifications; call from the owning
    /// thread. Returns the number of frames handled.
    pub fn pump(&self) -> usize {
        let mut handled = 0;
        while let Ok(frame) = self.rx.try_recv() {
            match ipc_proto::decode::<ParentMessage>(&frame) {
                Ok(ParentMessage::Response { id, value }) => {
                    let task = self.pending.lock().remove(&id);
                    match task {
                        Some(mut task) => {
                            task.apply_response(value);
                            task.handler_callback();
                            handled += 1;
                        }
                        None => tracing::debug!("Response for unknown request {}", id),
                    }
                }
                Ok(ParentMessage::Notify { id, value }) => {
                    let pending = self.pending.lock();
                    match pending.get(&id) {
                        Some(task) => {
                            task.handler_notify(&value);
                            handled += 1;
                        }
                        None => tracing::debug!("Notification for unknown request {}", id),
                    }
                }
                Err(err) => tracing::warn!("Dropping undecodable frame: {}", err),
            }
        }
        handled
    }
}

/// Privileged-process endpoint: reconstructs and runs requested tasks
pub struct ParentEndpoint {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    runner: Arc<TaskRunner>,
    permissions: Arc<dyn PermissionChecker>,
    controls: Arc<DashMap<Uuid, TaskControl>>,
}

impl ParentEndpoint {
    pub fn new(
        half: ParentHalf,
        runner: Arc<TaskRunner>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        Self {
            tx: half.tx,
            rx: half.rx,
            runner,
            permissions,
            controls: Arc::new(DashMap::new()),
        }
    }

    /// Process queued requests and control messages; call from the
    /// privileged owning thread. Returns the number of frames handled.
    pub fn service(&self) -> usize {
        let mut handled = 0;
        while let Ok(frame) = self.rx.try_recv() {
            match ipc_proto::decode::<ChildMessage>(&frame) {
                Ok(ChildMessage::Request { id, params }) => {
                    self.dispatch(id, params);
                    handled += 1;
                }
                Ok(ChildMessage::Control { id, message }) => {
                    self.apply_control(id, message);
                    handled += 1;
                }
                Err(err) => tracing::warn!("Dropping undecodable frame: {}", err),
            }
        }
        handled
    }

    fn apply_control(&self, id: Uuid, message: ControlMessage) {
        let Some(control) = self.controls.get(&id) else {
            tracing::debug!("Control message for unknown request {}", id);
            return;
        };
        match message {
            ControlMessage::Abort => {
                control.abort.store(true, Ordering::SeqCst);
                if let Some(gate) = &control.gate {
                    gate.wake();
                }
            }
            ControlMessage::NextEnumerate => {
                if let Some(gate) = &control.gate {
                    gate.release_next();
                }
            }
        }
    }

    fn dispatch(&self, id: Uuid, params: FileSystemRequest) {
        let Some(filesystem) = StorageRegistry::from_string(params.filesystem()) else {
            tracing::warn!("Request for unknown filesystem {}", params.filesystem());
            self.respond(id, FileSystemResponse::Error { code: ErrorCode::Unknown });
            return;
        };

        let sink = ResponseSink::new(self.tx.clone(), id, self.controls.clone());
        let buffer_size = self.runner.config().output_buffer_size;

        let mut gate = None;
        let task: Box<dyn FileSystemTask> = match params {
            FileSystemRequest::CreateDirectory { real_path, .. } => {
                Box::new(CreateDirectoryTask::from_request(&filesystem, id, real_path, sink))
            }
            FileSystemRequest::CreateFile { real_path, data, replace, .. } => Box::new(
                CreateFileTask::from_request(&filesystem, id, real_path, data, replace, buffer_size, sink),
            ),
            FileSystemRequest::Move { directory, src, dest_directory, dest_name, .. } => Box::new(
                MoveTask::from_request(&filesystem, id, directory, src, dest_directory, dest_name, sink),
            ),
            FileSystemRequest::Remove { directory, target, recursive, .. } => Box::new(
                RemoveTask::from_request(&filesystem, id, directory, target, recursive, sink),
            ),
            FileSystemRequest::Enumerate { directory, target, recursive, .. } => {
                let task =
                    EnumerateTask::from_request(&filesystem, id, directory, target, recursive, sink);
                gate = Some(task.gate());
                Box::new(task)
            }
            FileSystemRequest::GetFileOrDirectory { real_path, .. } => {
                Box::new(GetFileOrDirectoryTask::from_request(&filesystem, id, real_path, sink))
            }
        };

        let permission = format!("{}-{}", filesystem.permission_name(), task.access_type());
        if !self.permissions.check(&permission) {
            tracing::warn!("Permission denied for {}: {}", id, permission);
            self.respond(id, FileSystemResponse::Error { code: ErrorCode::Security });
            return;
        }

        self.controls.insert(
            id,
            TaskControl {
                _filesystem: filesystem,
                abort: task.state().abort_flag(),
                gate,
            },
        );
        self.runner.start(task);
    }

    fn respond(&self, id: Uuid, value: FileSystemResponse) {
        match ipc_proto::encode(&ParentMessage::Response { id, value }) {
            Ok(frame) => {
                if self.tx.send(frame).is_err() {
                    tracing::debug!("Peer gone, dropping response for {}", id);
                }
            }
            Err(err) => tracing::warn!("Failed to encode response: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::directory::{Directory, RemoveTarget};
    use crate::executor::EventQueue;
    use crate::filesystem::{FileSystemOps, StorageFileSystem, StorageRegistry};
    use crate::promise::{AbortableHandle, HandleState, TaskValue};
    use crate::task::ContentSource;
    use ipc_proto::NotifyValue;
    use std::time::{Duration, Instant};

    /// The privileged side of a simulated process pair
    struct ParentWorld {
        _root: tempfile::TempDir,
        area: String,
        queue: EventQueue,
        endpoint: ParentEndpoint,
    }

    /// The content side of a simulated process pair
    struct ChildWorld {
        queue: EventQueue,
        endpoint: Arc<ChildEndpoint>,
        filesystem: Arc<dyn FileSystemOps>,
        runner: Arc<TaskRunner>,
    }

    fn worlds(area: &str, permissions: Arc<dyn PermissionChecker>) -> (ParentWorld, ChildWorld) {
        let root = tempfile::tempdir().unwrap();
        StorageRegistry::register(area, root.path().to_path_buf());

        let (child_half, parent_half) = request_channel(CoreConfig::default().channel_capacity);

        let parent_queue = EventQueue::new();
        let parent_runner = TaskRunner::privileged(parent_queue.sink(), CoreConfig::default());
        let parent_endpoint = ParentEndpoint::new(parent_half, parent_runner, permissions);

        let child_queue = EventQueue::new();
        let child_endpoint = ChildEndpoint::new(child_half);
        let child_runner = TaskRunner::content(
            child_queue.sink(),
            CoreConfig::default(),
            child_endpoint.clone(),
        );
        let filesystem: Arc<dyn FileSystemOps> = Arc::new(StorageFileSystem::for_content(area));

        (
            ParentWorld {
                _root: root,
                area: area.to_string(),
                queue: parent_queue,
                endpoint: parent_endpoint,
            },
            ChildWorld {
                queue: child_queue,
                endpoint: child_endpoint,
                filesystem,
                runner: child_runner,
            },
        )
    }

    impl ParentWorld {
        fn local_path(&self, virtual_path: &str) -> std::path::PathBuf {
            store_io::VirtualPath::from_trusted(virtual_path).to_local(self._root.path())
        }
    }

    impl Drop for ParentWorld {
        fn drop(&mut self) {
            StorageRegistry::unregister(&self.area);
        }
    }

    impl ChildWorld {
        fn root_dir(&self) -> Directory {
            Directory::root(&self.filesystem, self.runner.clone())
        }
    }

    /// Pump both simulated processes until the handle settles
    fn drive(
        parent: &ParentWorld,
        child: &ChildWorld,
        handle: &AbortableHandle,
    ) -> Result<TaskValue, ipc_proto::ErrorCode> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.state() == HandleState::Pending {
            assert!(Instant::now() < deadline, "handle did not settle");
            parent.endpoint.service();
            parent.queue.pump_blocking(Duration::from_millis(5));
            child.endpoint.pump();
            child.queue.pump();
        }
        handle.result().expect("settled handle has a result")
    }

    /// Pump both sides once without waiting on a handle
    fn pump_round(parent: &ParentWorld, child: &ChildWorld) {
        parent.endpoint.service();
        parent.queue.pump_blocking(Duration::from_millis(5));
        child.endpoint.pump();
        child.queue.pump();
    }

    #[test]
    fn test_cross_process_create_directory() {
        let (parent, child) = worlds("x-create", Arc::new(AllowAll));
        let root = child.root_dir();

        let handle = root.create_directory("a");
        match drive(&parent, &child, &handle) {
            Ok(TaskValue::Directory(path)) => assert_eq!(path.as_str(), "a"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(parent.local_path("a").is_dir());

        // Same request again round-trips the PathExists error
        let handle = root.create_directory("a");
        assert_eq!(
            drive(&parent, &child, &handle),
            Err(ErrorCode::PathExists)
        );
    }

    #[test]
    fn test_cross_process_create_file_and_remove() {
        let (parent, child) = worlds("x-file", Arc::new(AllowAll));
        let root = child.root_dir();

        let handle = root.create_file("f.txt", ContentSource::Bytes(b"wire".to_vec()), false);
        let file = match drive(&parent, &child, &handle) {
            Ok(TaskValue::File(file)) => file,
            other => panic!("unexpected result: {:?}", other),
        };
        assert_eq!(std::fs::read(parent.local_path("f.txt")).unwrap(), b"wire");

        // The vended handle works as a remove target from the same scope
        let handle = root.remove(RemoveTarget::Ref(file));
        assert_eq!(
            drive(&parent, &child, &handle),
            Ok(TaskValue::Boolean(true))
        );
        assert!(!parent.local_path("f.txt").exists());
    }

    struct DenyWrites;

    impl PermissionChecker for DenyWrites {
        fn check(&self, permission: &str) -> bool {
            permission.ends_with("-read")
        }
    }

    #[test]
    fn test_permission_denied_rejects_without_running() {
        let (parent, child) = worlds("x-denied", Arc::new(DenyWrites));
        let root = child.root_dir();

        let handle = root.create_directory("a");
        assert_eq!(drive(&parent, &child, &handle), Err(ErrorCode::Security));
        assert!(!parent.local_path("a").exists());

        // Reads still pass the checker
        std::fs::create_dir_all(parent.local_path("d")).unwrap();
        let handle = root.get("d");
        assert!(matches!(
            drive(&parent, &child, &handle),
            Ok(TaskValue::Directory(_))
        ));
    }

    #[test]
    fn test_unknown_filesystem_is_rejected() {
        let (parent, child) = worlds("x-known", Arc::new(AllowAll));
        let unknown: Arc<dyn FileSystemOps> =
            Arc::new(StorageFileSystem::for_content("x-never-registered"));
        let root = Directory::root(&unknown, child.runner.clone());

        let handle = root.create_directory("a");
        assert_eq!(drive(&parent, &child, &handle), Err(ErrorCode::Unknown));
    }

    #[test]
    fn test_cross_process_enumerate_paced_and_notified() {
        let (parent, child) = worlds("x-enumerate", Arc::new(AllowAll));
        std::fs::create_dir_all(parent.local_path("x/y")).unwrap();
        std::fs::write(parent.local_path("x/f1"), b"1").unwrap();
        std::fs::write(parent.local_path("x/y/f2"), b"2").unwrap();

        let root = child.root_dir();
        let batches: Arc<parking_lot::Mutex<Vec<Vec<ipc_proto::EntryInfo>>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));

        let handle = root.enumerate(Some("x"), true);
        let batches_clone = batches.clone();
        handle.on_progress(Box::new(move |value| {
            if let NotifyValue::Entries(entries) = value {
                batches_clone.lock().push(entries.clone());
            }
        }));

        let deadline = Instant::now() + Duration::from_secs(5);
        while batches.lock().len() < 1 {
            assert!(Instant::now() < deadline, "first level never arrived");
            pump_round(&parent, &child);
        }
        {
            let batches = batches.lock();
            let mut level1: Vec<&str> = batches[0].iter().map(|e| e.path.as_str()).collect();
            level1.sort();
            assert_eq!(level1, vec!["x/f1", "x/y"]);
        }
        assert_eq!(handle.state(), HandleState::Pending);

        // Readiness crosses the channel as a control message
        handle.request_next();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.state() == HandleState::Pending {
            assert!(Instant::now() < deadline, "handle did not settle");
            pump_round(&parent, &child);
        }
        assert_eq!(handle.result().unwrap(), Ok(TaskValue::Void));

        let batches = batches.lock();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1][0].path, "x/y/f2");
    }

    #[test]
    fn test_cross_process_abort_is_best_effort() {
        let (parent, child) = worlds("x-abort", Arc::new(AllowAll));
        std::fs::create_dir_all(parent.local_path("x/y")).unwrap();
        std::fs::write(parent.local_path("x/f1"), b"1").unwrap();

        let root = child.root_dir();
        let handle = root.enumerate(Some("x"), true);

        // Let the request reach the parent and the worker park on the gate
        for _ in 0..5 {
            pump_round(&parent, &child);
        }

        // Local rejection is immediate; the control message wakes the
        // parked worker so the remote task terminates as Aborted too
        handle.abort();
        assert_eq!(handle.result().unwrap(), Err(ErrorCode::Aborted));

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            assert!(Instant::now() < deadline, "remote task never terminated");
            pump_round(&parent, &child);
            // Drained control entry means the parent task completed
            if parent.endpoint.controls.is_empty() {
                break;
            }
        }
    }

    #[test]
    fn test_response_to_torn_down_peer_is_dropped() {
        let (parent, child) = worlds("x-torn", Arc::new(AllowAll));
        let root = child.root_dir();

        let handle = root.create_directory("a");
        // The request frame is queued; tear the content side down entirely
        drop(root);
        drop(handle);
        let ChildWorld { queue, endpoint, filesystem, runner } = child;
        drop(runner);
        drop(endpoint);
        drop(filesystem);
        drop(queue);

        // The parent still runs the task and silently drops the response
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            assert!(Instant::now() < deadline, "parent task never completed");
            parent.endpoint.service();
            parent.queue.pump_blocking(Duration::from_millis(5));
            if parent.local_path("a").is_dir() && parent.endpoint.controls.is_empty() {
                break;
            }
        }
    }
}
