//! Task state machine - one filesystem operation from request to settled result
//!
//! A task is constructed on the owning thread, then started exactly once.
//! Starting either short-circuits (a pre-set error skips the work entirely),
//! dispatches the task to the background worker pool (privileged process),
//! or serializes it over the request channel (content process). The worker
//! posts the task back to the owning thread, where the result is delivered
//! exactly once: through the response sink for remote-bound tasks, through
//! `handler_callback` for local ones.

mod create_directory;
mod create_file;
mod enumerate;
mod get_file_or_directory;
mod move_task;
mod remove;

pub use create_directory::CreateDirectoryTask;
pub use create_file::{ContentSource, CreateFileTask};
pub use enumerate::{EnumerateTask, EnumerationGate};
pub use get_file_or_directory::GetFileOrDirectoryTask;
pub use move_task::MoveTask;
pub use remove::RemoveTask;

use crate::channel::{ChildEndpoint, ResponseSink};
use crate::config::CoreConfig;
use crate::error::TaskError;
use crate::executor::{EventSink, ProcessRole, WorkerPool};
use crate::filesystem::{FileSystemOps, FileSystemWeakRef};
use crate::promise::AbortableProgressHandle;
use ipc_proto::{AccessType, FileSystemRequest, FileSystemResponse, NotifyValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// State shared by every task kind
pub struct TaskState {
    filesystem: FileSystemWeakRef,
    filesystem_name: String,
    request_id: Uuid,
    error: Option<ipc_proto::ErrorCode>,
    abort: Arc<AtomicBool>,
    sink: Option<ResponseSink>,
}

impl TaskState {
    /// State for a task whose result settles a local handle
    pub fn local(
        filesystem: FileSystemWeakRef,
        filesystem_name: String,
        request_id: Uuid,
        abort: Arc<AtomicBool>,
    ) -> Self {
        Self {
            filesystem,
            filesystem_name,
            request_id,
            error: None,
            abort,
            sink: None,
        }
    }

    /// State for a task reconstructed from a channel request; the result
    /// goes back through the sink instead of a local handle
    pub fn remote(filesystem: &Arc<dyn FileSystemOps>, request_id: Uuid, sink: ResponseSink) -> Self {
        Self {
            filesystem: FileSystemWeakRef::new(filesystem),
            filesystem_name: filesystem.canonical_name().to_string(),
            request_id,
            error: None,
            abort: Arc::new(AtomicBool::new(false)),
            sink: Some(sink),
        }
    }

    pub fn filesystem(&self) -> Option<Arc<dyn FileSystemOps>> {
        self.filesystem.get()
    }

    pub fn filesystem_name(&self) -> &str {
        &self.filesystem_name
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Translate and store a failure; the driver calls this at most once
    /// per task, so the slot is written once.
    pub fn set_error(&mut self, error: impl Into<TaskError>) {
        self.error = Some(error.into().translate());
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<ipc_proto::ErrorCode> {
        self.error
    }

    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    pub fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Cooperative-cancellation checkpoint for multi-step operations
    pub fn check_abort(&self) -> Result<(), TaskError> {
        if self.aborted() {
            Err(ipc_proto::ErrorCode::Aborted.into())
        } else {
            Ok(())
        }
    }

    pub(crate) fn sink(&self) -> Option<&ResponseSink> {
        self.sink.as_ref()
    }
}

/// One filesystem operation's behavior
///
/// `work` runs on exactly one background thread, exactly once, and never
/// touches the owning-thread handle objects; everything else runs on the
/// owning thread.
pub trait FileSystemTask: Send {
    fn kind(&self) -> &'static str;

    fn state(&self) -> &TaskState;

    fn state_mut(&mut self) -> &mut TaskState;

    /// Permission class checked before a cross-process task may run
    fn access_type(&self) -> AccessType;

    /// Perform the operation; any failure becomes the task's error slot
    fn work(&mut self) -> Result<(), TaskError>;

    /// Settle the caller-visible handle; silently no-ops if the owning
    /// filesystem is gone
    fn handler_callback(&mut self);

    /// Serialized form sent over the request channel
    fn request_params(&self) -> FileSystemRequest;

    /// Response for a successfully completed remote-bound task
    fn success_response(&mut self) -> FileSystemResponse;

    /// Store a success response received from the channel
    fn set_success_response(&mut self, value: FileSystemResponse);

    /// Apply a response received from the channel (content side)
    fn apply_response(&mut self, value: FileSystemResponse) {
        match value {
            FileSystemResponse::Error { code } => self.state_mut().set_error(code),
            other => self.set_success_response(other),
        }
    }

    /// Deliver an out-of-band notification received from the channel
    fn handler_notify(&self, value: &NotifyValue) {
        let _ = value;
    }
}

/// How a task delivers progress from the worker thread
pub enum ProgressRoute {
    None,
    /// Post to the owning thread, which fires the handle's observers
    Local {
        handle: Arc<AbortableProgressHandle>,
        owning: EventSink,
    },
    /// Send a notify frame back through the channel
    Remote { sink: ResponseSink },
}

impl ProgressRoute {
    /// Best-effort delivery; failures are logged and swallowed
    pub fn notify(&self, value: NotifyValue) {
        match self {
            ProgressRoute::None => {}
            ProgressRoute::Local { handle, owning } => {
                let handle = handle.clone();
                owning.post(move || handle.notify_progress(&value));
            }
            ProgressRoute::Remote { sink } => sink.send_notify(value),
        }
    }
}

/// Starts tasks and drives them through the two-hop handoff
pub struct TaskRunner {
    role: ProcessRole,
    owning: EventSink,
    config: CoreConfig,
    workers: Option<WorkerPool>,
    proxy: Option<Arc<ChildEndpoint>>,
}

impl TaskRunner {
    /// Runner for the privileged process: tasks execute on a local pool
    pub fn privileged(owning: EventSink, config: CoreConfig) -> Arc<Self> {
        let workers = WorkerPool::new(config.worker_threads);
        Arc::new(Self {
            role: ProcessRole::Privileged,
            owning,
            config,
            workers: Some(workers),
            proxy: None,
        })
    }

    /// Runner for a content process: tasks are proxied over the channel
    pub fn content(owning: EventSink, config: CoreConfig, proxy: Arc<ChildEndpoint>) -> Arc<Self> {
        Arc::new(Self {
            role: ProcessRole::Content,
            owning,
            config,
            workers: None,
            proxy: Some(proxy),
        })
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn owning_sink(&self) -> EventSink {
        self.owning.clone()
    }

    pub fn proxy(&self) -> Option<Arc<ChildEndpoint>> {
        self.proxy.clone()
    }

    /// Start a task; must be called from the owning thread, once per task
    pub fn start(&self, task: Box<dyn FileSystemTask>) {
        if task.state().has_error() {
            // Short circuit: skip the work entirely
            tracing::debug!(kind = task.kind(), "Task short-circuited with pre-set error");
            self.owning.post(move || finish_on_owning(task));
            return;
        }

        match self.role {
            ProcessRole::Privileged => {
                let owning = self.owning.clone();
                let workers = self
                    .workers
                    .as_ref()
                    .expect("privileged runner always has a worker pool");
                tracing::debug!(kind = task.kind(), "Dispatching task to worker pool");
                workers.dispatch(move || {
                    let mut task = task;
                    if let Err(error) = task.work() {
                        tracing::debug!(
                            kind = task.kind(),
                            code = ?error.translate(),
                            "Task failed"
                        );
                        task.state_mut().set_error(error);
                    }
                    owning.post(move || finish_on_owning(task));
                });
            }
            ProcessRole::Content => {
                if task.state().filesystem().is_none() {
                    // Owning context is gone; nothing left to report to.
                    tracing::debug!(kind = task.kind(), "Filesystem gone before proxying");
                    return;
                }
                let proxy = self
                    .proxy
                    .as_ref()
                    .expect("content runner always has a channel endpoint");
                tracing::debug!(kind = task.kind(), "Proxying task over request channel");
                proxy.send_request(task, &self.owning);
            }
        }
    }
}

/// Owning-thread completion: respond through the sink for remote-bound
/// tasks, settle the local handle otherwise. Runs exactly once per task.
fn finish_on_owning(mut task: Box<dyn FileSystemTask>) {
    if let Some(sink) = task.state().sink().cloned() {
        if task.state().filesystem().is_none() {
            // The capability vanished mid-flight; the peer's context is
            // being torn down with it, so there is nobody to answer.
            return;
        }
        let response = match task.state().error() {
            Some(code) => FileSystemResponse::Error { code },
            None => task.success_response(),
        };
        sink.send_response(response);
    } else {
        task.handler_callback();
    }
}
