//! Owning-thread event queue and background worker pool
//!
//! The engine's only synchronization shape is a two-hop handoff: the owning
//! thread dispatches a task to a worker, the worker runs it, then posts the
//! completion back to the owning thread's queue. The owning thread is
//! whichever thread pumps the `EventQueue`.

use crossbeam_channel::{unbounded, Receiver, Sender, TrySendError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Which process this engine instance runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// Runs tasks on its own worker pool
    Privileged,
    /// Proxies tasks over the request channel
    Content,
}

type Job = Box<dyn FnOnce() + Send>;

/// Cloneable posting half of an `EventQueue`
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<Job>,
}

impl EventSink {
    /// Queue a closure to run on the owning thread
    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            tracing::warn!("Owning-thread queue is gone, dropping event");
        }
    }
}

/// The owning thread's work queue
///
/// Single consumer: the thread that created (or was handed) the queue pumps
/// it; that thread is the owning thread for every handle settled through it.
pub struct EventQueue {
    tx: Sender<Job>,
    rx: Receiver<Job>,
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn sink(&self) -> EventSink {
        EventSink { tx: self.tx.clone() }
    }

    /// Run everything currently queued; returns the number of jobs run
    pub fn pump(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Block up to `timeout` for one job, then drain the rest
    pub fn pump_blocking(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(job) => {
                job();
                1 + self.pump()
            }
            Err(_) => 0,
        }
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed pool of background worker threads
///
/// One worker runs one job at a time; a recursive enumeration parks its
/// worker for the lifetime of a slow consumer, so the pool must be sized
/// above the expected number of concurrent enumerations.
pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (tx, rx) = crossbeam_channel::bounded::<Job>(threads * 16);
        let mut handles = Vec::with_capacity(threads);

        for index in 0..threads {
            let rx: Receiver<Job> = rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("store-worker-{}", index))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        Self { tx: Some(tx), handles }
    }

    /// Queue a job; blocks if every worker is busy and the backlog is full
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        let Some(tx) = &self.tx else { return };
        let job: Job = Box::new(job);
        match tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(returned)) => {
                tracing::debug!("Worker backlog full, waiting");
                if tx.send(returned).is_err() {
                    tracing::warn!("Worker pool is gone, dropping job");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("Worker pool is gone, dropping job");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Close the channel, then wait for in-flight jobs to finish.
        self.tx = None;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
