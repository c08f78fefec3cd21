//! SandStore host - a self-contained demonstration of the task engine
//!
//! Runs both halves of the engine in one process: the main thread acts as
//! the privileged process (worker pool, permission checks, channel
//! servicing), a second thread acts as a sandboxed content process driving
//! operations over the request channel.

use anyhow::Context;
use ipc_proto::NotifyValue;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use store_core::{
    request_channel, AbortableHandle, AllowAll, ChildEndpoint, ContentSource, CoreConfig,
    Directory, EventQueue, FileSystemOps, HandleState, MoveDestination, MoveSource,
    ParentEndpoint, RemoveTarget, StorageFileSystem, StorageRegistry, TaskRunner, TaskValue,
};

const AREA: &str = "demo";

fn main() -> anyhow::Result<()> {
    let _log_guard = store_log::init()?;

    let config = CoreConfig::load(&PathBuf::from("store.toml"))?;

    let root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("sandstore-demo"));
    std::fs::create_dir_all(&root)
        .with_context(|| format!("creating storage root {}", root.display()))?;
    StorageRegistry::register(AREA, root.clone());
    tracing::info!("Storage area '{}' at {}", AREA, root.display());

    let (child_half, parent_half) = request_channel(config.channel_capacity);

    // Privileged side, serviced by this thread
    let parent_queue = EventQueue::new();
    let parent_runner = TaskRunner::privileged(parent_queue.sink(), config.clone());
    let parent_endpoint = ParentEndpoint::new(parent_half, parent_runner, Arc::new(AllowAll));

    // Content side on its own thread with its own owning queue
    let done = Arc::new(AtomicBool::new(false));
    let done_flag = done.clone();
    let content_config = config.clone();
    let content = std::thread::Builder::new()
        .name("content-process".to_string())
        .spawn(move || {
            let result = run_content(child_half, content_config);
            done_flag.store(true, Ordering::SeqCst);
            result
        })?;

    while !done.load(Ordering::SeqCst) {
        parent_endpoint.service();
        parent_queue.pump_blocking(Duration::from_millis(10));
    }
    // Drain anything the content side queued right before finishing
    parent_endpoint.service();
    parent_queue.pump();

    content.join().expect("content thread panicked")?;
    tracing::info!("Demo complete");
    Ok(())
}

/// The sandboxed side: every operation goes over the request channel
fn run_content(child_half: store_core::ChildHalf, config: CoreConfig) -> anyhow::Result<()> {
    let queue = EventQueue::new();
    let endpoint = ChildEndpoint::new(child_half);
    let runner = TaskRunner::content(queue.sink(), config, endpoint.clone());
    let filesystem: Arc<dyn FileSystemOps> = Arc::new(StorageFileSystem::for_content(AREA));

    let handle = Directory::get_root(&filesystem, runner.clone());
    let root_path = match settle(&queue, &endpoint, &handle)? {
        TaskValue::Directory(path) => path,
        other => anyhow::bail!("unexpected root result: {:?}", other),
    };
    let root = Directory::new(&filesystem, root_path, runner);
    tracing::info!("Opened storage root '{}'", root.name());

    let value = settle(&queue, &endpoint, &root.create_directory("albums"))?;
    tracing::info!("create_directory(albums) -> {:?}", value);

    let value = settle(
        &queue,
        &endpoint,
        &root.create_file("albums/cover.jpg", ContentSource::Bytes(vec![0xff; 1024]), false),
    )?;
    tracing::info!("create_file(albums/cover.jpg) -> {:?}", value);

    // Paced recursive enumeration: release one level per observed batch
    let handle = root.enumerate(None, true);
    let batches = Arc::new(AtomicUsize::new(0));
    let batches_clone = batches.clone();
    handle.on_progress(Box::new(move |value| {
        if let NotifyValue::Entries(entries) = value {
            for entry in entries {
                tracing::info!("  enumerated {} (dir: {})", entry.path, entry.is_dir);
            }
            batches_clone.fetch_add(1, Ordering::SeqCst);
        }
    }));
    let mut released = 0;
    let deadline = Instant::now() + Duration::from_secs(10);
    while handle.state() == HandleState::Pending {
        anyhow::ensure!(Instant::now() < deadline, "enumeration stalled");
        endpoint.pump();
        queue.pump_blocking(Duration::from_millis(10));
        let seen = batches.load(Ordering::SeqCst);
        if seen > released {
            released = seen;
            handle.request_next();
        }
    }
    tracing::info!("enumerate -> {:?}", handle.result());

    let handle = root.move_item(
        MoveSource::Relative("albums/cover.jpg".to_string()),
        MoveDestination::Relative("albums/best.jpg".to_string()),
    );
    let value = settle(&queue, &endpoint, handle.handle())?;
    tracing::info!("move(albums/cover.jpg -> albums/best.jpg) -> {:?}", value);

    let value = settle(
        &queue,
        &endpoint,
        &root.remove_deep(RemoveTarget::Relative("albums".to_string())),
    )?;
    tracing::info!("remove_deep(albums) -> {:?}", value);

    // Cancellation: reject locally, then tell the other side best-effort
    let handle = root.enumerate(None, true);
    handle.abort();
    tracing::info!("aborted enumerate -> {:?}", handle.result());
    // Give the abort control message a moment to drain
    endpoint.pump();
    queue.pump_blocking(Duration::from_millis(50));

    Ok(())
}

/// Pump the content side until the handle settles
fn settle(
    queue: &EventQueue,
    endpoint: &Arc<ChildEndpoint>,
    handle: &AbortableHandle,
) -> anyhow::Result<TaskValue> {
    let deadline = Instant::now() + Duration::from_secs(10);
    while handle.state() == HandleState::Pending {
        anyhow::ensure!(Instant::now() < deadline, "operation stalled");
        endpoint.pump();
        queue.pump_blocking(Duration::from_millis(10));
    }
    match handle.result().expect("settled handle has a result") {
        Ok(value) => Ok(value),
        Err(code) => anyhow::bail!("operation failed: {}", code),
    }
}
