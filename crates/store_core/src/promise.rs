//! Settle-once handles returned to callers
//!
//! `AbortableHandle` is the completion slot for one task: Pending until it
//! is resolved or rejected exactly once, with best-effort cancellation via
//! `abort()`. `AbortableProgressHandle` adds progress observers and the
//! "ready for more" signal used by paced enumeration.

use ipc_proto::{ErrorCode, FileRef, NotifyValue};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use store_io::VirtualPath;

/// Result value carried by a fulfilled handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskValue {
    Void,
    Boolean(bool),
    Directory(VirtualPath),
    File(FileRef),
}

/// Observable handle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Pending,
    Fulfilled,
    Rejected,
}

type SettleResult = Result<TaskValue, ErrorCode>;
type SettleObserver = Box<dyn FnOnce(&SettleResult) + Send>;
type AbortCallback = Box<dyn Fn() + Send + Sync>;

struct Inner {
    settled: Option<SettleResult>,
    observers: Vec<SettleObserver>,
}

/// A promise-like completion slot: settled at most once, settling after
/// settlement is a no-op.
pub struct AbortableHandle {
    inner: Mutex<Inner>,
    abort_callback: Option<AbortCallback>,
    abort_fired: AtomicBool,
}

impl AbortableHandle {
    /// A handle with no cancellation hook
    pub fn new() -> Self {
        Self::with_abort_callback(None)
    }

    /// A handle whose `abort()` forwards to the given callback; exactly one
    /// callback is configured per handle, at construction.
    pub fn with_abort_callback(callback: Option<AbortCallback>) -> Self {
        Self {
            inner: Mutex::new(Inner { settled: None, observers: Vec::new() }),
            abort_callback: callback,
            abort_fired: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> HandleState {
        match &self.inner.lock().settled {
            None => HandleState::Pending,
            Some(Ok(_)) => HandleState::Fulfilled,
            Some(Err(_)) => HandleState::Rejected,
        }
    }

    /// The settled outcome, if any
    pub fn result(&self) -> Option<SettleResult> {
        self.inner.lock().settled.clone()
    }

    /// Attach a completion observer; fires immediately if already settled
    pub fn when_settled(&self, observer: SettleObserver) {
        let mut inner = self.inner.lock();
        match &inner.settled {
            Some(result) => {
                let result = result.clone();
                drop(inner);
                observer(&result);
            }
            None => inner.observers.push(observer),
        }
    }

    pub fn resolve(&self, value: TaskValue) {
        self.settle(Ok(value));
    }

    pub fn reject(&self, code: ErrorCode) {
        self.settle(Err(code));
    }

    /// Only effective while Pending: rejects with Aborted and fires the
    /// abort callback exactly once.
    pub fn abort(&self) {
        {
            let inner = self.inner.lock();
            if inner.settled.is_some() {
                return;
            }
        }
        self.settle(Err(ErrorCode::Aborted));
        if !self.abort_fired.swap(true, Ordering::SeqCst) {
            if let Some(callback) = &self.abort_callback {
                callback();
            }
        }
    }

    fn settle(&self, result: SettleResult) {
        let observers = {
            let mut inner = self.inner.lock();
            if inner.settled.is_some() {
                return;
            }
            inner.settled = Some(result.clone());
            std::mem::take(&mut inner.observers)
        };
        for observer in observers {
            observer(&result);
        }
    }
}

impl Default for AbortableHandle {
    fn default() -> Self {
        Self::new()
    }
}

type ProgressObserver = Box<dyn Fn(&NotifyValue) + Send>;
type NextCallback = Box<dyn Fn() + Send + Sync>;

/// A completion slot with progress reporting
///
/// Progress observers fire in registration order on every notification and
/// only while the handle is pending. `request_next()` releases the next
/// level of a paced enumeration.
pub struct AbortableProgressHandle {
    handle: AbortableHandle,
    observers: Mutex<Vec<ProgressObserver>>,
    next_callback: Option<NextCallback>,
}

impl AbortableProgressHandle {
    pub fn new(abort_callback: Option<AbortCallback>, next_callback: Option<NextCallback>) -> Self {
        Self {
            handle: AbortableHandle::with_abort_callback(abort_callback),
            observers: Mutex::new(Vec::new()),
            next_callback,
        }
    }

    /// The underlying completion slot
    pub fn handle(&self) -> &AbortableHandle {
        &self.handle
    }

    pub fn state(&self) -> HandleState {
        self.handle.state()
    }

    pub fn result(&self) -> Option<SettleResult> {
        self.handle.result()
    }

    pub fn resolve(&self, value: TaskValue) {
        self.handle.resolve(value);
    }

    pub fn reject(&self, code: ErrorCode) {
        self.handle.reject(code);
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn when_settled(&self, observer: SettleObserver) {
        self.handle.when_settled(observer);
    }

    /// Attach a progress observer; ignored once settled
    pub fn on_progress(&self, observer: ProgressObserver) {
        if self.handle.state() != HandleState::Pending {
            return;
        }
        self.observers.lock().push(observer);
    }

    /// Deliver a progress value to all observers; no-op once settled
    pub fn notify_progress(&self, value: &NotifyValue) {
        if self.handle.state() != HandleState::Pending {
            return;
        }
        for observer in self.observers.lock().iter() {
            observer(value);
        }
    }

    /// Signal readiness for the next enumeration level
    pub fn request_next(&self) {
        if let Some(callback) = &self.next_callback {
            callback();
        }
    }
}
