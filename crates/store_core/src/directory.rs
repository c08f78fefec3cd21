//! Directory - the caller-facing entry point for storage operations
//!
//! A `Directory` validates and normalizes caller paths, constructs the
//! matching task, hands back the task's settle-once handle, and starts the
//! task. Validation failures never throw: the task is started carrying the
//! error and short-circuits straight to the handle.

use crate::error::TaskError;
use crate::executor::ProcessRole;
use crate::filesystem::{FileSystemOps, FileSystemWeakRef};
use crate::promise::{AbortableHandle, AbortableProgressHandle};
use crate::task::{
    ContentSource, CreateDirectoryTask, CreateFileTask, EnumerateTask, EnumerationGate,
    FileSystemTask, GetFileOrDirectoryTask, MoveTask, ProgressRoute, RemoveTask, TaskRunner,
};
use ipc_proto::{ControlMessage, ErrorCode, FileRef, PathOrRef};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use store_io::VirtualPath;
use uuid::Uuid;

/// Source of a move operation
pub enum MoveSource {
    /// Path relative to the directory
    Relative(String),
    /// Previously-vended file handle
    Ref(FileRef),
    /// Another directory object
    Directory(Directory),
}

/// Destination of a move operation
pub enum MoveDestination {
    /// Path relative to the source's directory
    Relative(String),
    /// Into a directory, keeping the source name
    Directory(Directory),
    /// Into a directory under a new name
    Into { dir: Directory, name: String },
}

/// Target of a remove operation
pub enum RemoveTarget {
    Relative(String),
    Ref(FileRef),
}

/// One directory of one storage area
#[derive(Clone)]
pub struct Directory {
    filesystem: FileSystemWeakRef,
    filesystem_name: String,
    path: VirtualPath,
    runner: Arc<TaskRunner>,
}

impl Directory {
    pub fn new(
        filesystem: &Arc<dyn FileSystemOps>,
        path: VirtualPath,
        runner: Arc<TaskRunner>,
    ) -> Self {
        Self {
            filesystem: FileSystemWeakRef::new(filesystem),
            filesystem_name: filesystem.canonical_name().to_string(),
            path,
            runner,
        }
    }

    /// The root directory object of a storage area
    pub fn root(filesystem: &Arc<dyn FileSystemOps>, runner: Arc<TaskRunner>) -> Self {
        Self::new(filesystem, VirtualPath::root(), runner)
    }

    /// Fetch the root, creating it on the backing store if absent
    pub fn get_root(
        filesystem: &Arc<dyn FileSystemOps>,
        runner: Arc<TaskRunner>,
    ) -> Arc<AbortableHandle> {
        Self::root(filesystem, runner).get_with(VirtualPath::root(), true, None)
    }

    pub fn path(&self) -> &VirtualPath {
        &self.path
    }

    /// Caller-visible name: the storage area's root name at the root, the
    /// leaf segment otherwise
    pub fn name(&self) -> String {
        if self.path.is_root() {
            self.filesystem
                .get()
                .map(|fs| fs.root_name().to_string())
                .unwrap_or_default()
        } else {
            self.path.leaf_name().to_string()
        }
    }

    /// Create a directory at a relative path
    pub fn create_directory(&self, relative: &str) -> Arc<AbortableHandle> {
        let request_id = Uuid::new_v4();
        let abort = Arc::new(AtomicBool::new(false));
        let promise = Arc::new(AbortableHandle::with_abort_callback(Some(
            self.abort_callback(request_id, abort.clone(), None),
        )));

        let (target, error) = self.resolve_child(relative);
        let mut task = CreateDirectoryTask::new(
            self.filesystem.clone(),
            self.filesystem_name.clone(),
            request_id,
            abort,
            target,
            promise.clone(),
        );
        if let Some(code) = error {
            task.state_mut().set_error(code);
        }
        self.runner.start(Box::new(task));
        promise
    }

    /// Create a file at a relative path with the given content
    pub fn create_file(
        &self,
        relative: &str,
        content: ContentSource,
        replace: bool,
    ) -> Arc<AbortableHandle> {
        let request_id = Uuid::new_v4();
        let abort = Arc::new(AtomicBool::new(false));
        let promise = Arc::new(AbortableHandle::with_abort_callback(Some(
            self.abort_callback(request_id, abort.clone(), None),
        )));

        let (target, mut error) = self.resolve_child(relative);

        // Stream content cannot cross the channel; drain it before proxying
        let content = match (self.runner.role(), content) {
            (ProcessRole::Content, ContentSource::Stream(mut reader)) => {
                let mut bytes = Vec::new();
                match reader.read_to_end(&mut bytes) {
                    Ok(_) => ContentSource::Bytes(bytes),
                    Err(err) => {
                        if error.is_none() {
                            error = Some(TaskError::from(err).translate());
                        }
                        ContentSource::Bytes(Vec::new())
                    }
                }
            }
            (_, content) => content,
        };

        let mut task = CreateFileTask::new(
            self.filesystem.clone(),
            self.filesystem_name.clone(),
            request_id,
            abort,
            target,
            content,
            replace,
            self.runner.config().output_buffer_size,
            promise.clone(),
        );
        if let Some(code) = error {
            task.state_mut().set_error(code);
        }
        self.runner.start(Box::new(task));
        promise
    }

    /// Fetch the file or directory at a relative path
    pub fn get(&self, relative: &str) -> Arc<AbortableHandle> {
        let (target, error) = self.resolve_child(relative);
        self.get_with(target, false, error)
    }

    /// Move an entry; the source must be a descendant of this directory
    pub fn move_item(&self, src: MoveSource, dest: MoveDestination) -> Arc<AbortableProgressHandle> {
        let request_id = Uuid::new_v4();
        let abort = Arc::new(AtomicBool::new(false));
        let promise = Arc::new(AbortableProgressHandle::new(
            Some(self.abort_callback(request_id, abort.clone(), None)),
            None,
        ));

        let mut error = None;

        let src = match src {
            MoveSource::Relative(rel) => match self.path.child(&rel) {
                Some(path) => PathOrRef::Path(path.as_str().to_string()),
                None => {
                    error = Some(ErrorCode::InvalidPath);
                    PathOrRef::Path(String::new())
                }
            },
            MoveSource::Ref(file_ref) => PathOrRef::Ref(file_ref),
            MoveSource::Directory(dir) => {
                // A directory can only move its own descendants
                if !dir.path.is_descendant_of(&self.path) {
                    error = Some(ErrorCode::NoModificationAllowed);
                }
                PathOrRef::Path(dir.path.as_str().to_string())
            }
        };

        let (dest_directory, dest_name) = match dest {
            MoveDestination::Relative(rel) => match self.path.child(&rel) {
                Some(path) => {
                    let name = path.leaf_name().to_string();
                    (path.parent().unwrap_or_else(VirtualPath::root), Some(name))
                }
                None => {
                    error.get_or_insert(ErrorCode::InvalidPath);
                    (self.path.clone(), None)
                }
            },
            MoveDestination::Directory(dir) => (dir.path.clone(), None),
            MoveDestination::Into { dir, name } => {
                if dir.path.join_name(&name).is_none() {
                    error.get_or_insert(ErrorCode::InvalidPath);
                }
                (dir.path.clone(), Some(name))
            }
        };

        // Cannot move an entry onto itself or into its own descendant
        if error.is_none() {
            if let PathOrRef::Path(src_str) = &src {
                let src_path = VirtualPath::from_trusted(src_str.clone());
                let name = dest_name
                    .clone()
                    .unwrap_or_else(|| src_path.leaf_name().to_string());
                if let Some(dest_path) = dest_directory.join_name(&name) {
                    if dest_path == src_path || dest_path.is_descendant_of(&src_path) {
                        error = Some(ErrorCode::InvalidModification);
                    }
                }
            }
        }

        let route = self.progress_route(&promise);
        let mut task = MoveTask::new(
            self.filesystem.clone(),
            self.filesystem_name.clone(),
            request_id,
            abort,
            self.path.clone(),
            src,
            dest_directory,
            dest_name,
            route,
            promise.clone(),
        );
        if let Some(code) = error {
            task.state_mut().set_error(code);
        }
        self.runner.start(Box::new(task));
        promise
    }

    /// Remove an entry; succeeds with `false` if it is already absent
    pub fn remove(&self, target: RemoveTarget) -> Arc<AbortableHandle> {
        self.remove_internal(target, false)
    }

    /// Remove an entry and everything beneath it
    pub fn remove_deep(&self, target: RemoveTarget) -> Arc<AbortableHandle> {
        self.remove_internal(target, true)
    }

    /// Enumerate a directory, one level per progress batch
    ///
    /// With `recursive`, the next level is released by `request_next()` on
    /// the returned handle.
    pub fn enumerate(&self, relative: Option<&str>, recursive: bool) -> Arc<AbortableProgressHandle> {
        let request_id = Uuid::new_v4();
        let abort = Arc::new(AtomicBool::new(false));
        let gate = EnumerationGate::new();
        let promise = Arc::new(AbortableProgressHandle::new(
            Some(self.abort_callback(request_id, abort.clone(), Some(gate.clone()))),
            Some(self.next_callback(request_id, gate.clone())),
        ));

        let (target, error) = match relative {
            Some(rel) => self.resolve_child(rel),
            None => (self.path.clone(), None),
        };

        let route = self.progress_route(&promise);
        let mut task = EnumerateTask::new(
            self.filesystem.clone(),
            self.filesystem_name.clone(),
            request_id,
            abort,
            self.path.clone(),
            target,
            recursive,
            gate,
            route,
            promise.clone(),
        );
        if let Some(code) = error {
            task.state_mut().set_error(code);
        }
        self.runner.start(Box::new(task));
        promise
    }

    fn remove_internal(&self, target: RemoveTarget, recursive: bool) -> Arc<AbortableHandle> {
        let request_id = Uuid::new_v4();
        let abort = Arc::new(AtomicBool::new(false));
        let promise = Arc::new(AbortableHandle::with_abort_callback(Some(
            self.abort_callback(request_id, abort.clone(), None),
        )));

        let (target, error) = match target {
            RemoveTarget::Relative(rel) => match self.path.child(&rel) {
                Some(path) => (PathOrRef::Path(path.as_str().to_string()), None),
                None => (PathOrRef::Path(String::new()), Some(ErrorCode::InvalidPath)),
            },
            RemoveTarget::Ref(file_ref) => (PathOrRef::Ref(file_ref), None),
        };

        let mut task = RemoveTask::new(
            self.filesystem.clone(),
            self.filesystem_name.clone(),
            request_id,
            abort,
            self.path.clone(),
            target,
            recursive,
            promise.clone(),
        );
        if let Some(code) = error {
            task.state_mut().set_error(code);
        }
        self.runner.start(Box::new(task));
        promise
    }

    fn get_with(
        &self,
        target: VirtualPath,
        directory_only: bool,
        error: Option<ErrorCode>,
    ) -> Arc<AbortableHandle> {
        let request_id = Uuid::new_v4();
        let abort = Arc::new(AtomicBool::new(false));
        let promise = Arc::new(AbortableHandle::with_abort_callback(Some(
            self.abort_callback(request_id, abort.clone(), None),
        )));

        let mut task = GetFileOrDirectoryTask::new(
            self.filesystem.clone(),
            self.filesystem_name.clone(),
            request_id,
            abort,
            target,
            directory_only,
            promise.clone(),
        );
        if let Some(code) = error {
            task.state_mut().set_error(code);
        }
        self.runner.start(Box::new(task));
        promise
    }

    fn resolve_child(&self, relative: &str) -> (VirtualPath, Option<ErrorCode>) {
        match self.path.child(relative) {
            Some(path) => (path, None),
            None => (self.path.clone(), Some(ErrorCode::InvalidPath)),
        }
    }

    /// Abort hook: store the flag first, then wake any parked worker, then
    /// tell the remote side (best effort, no acknowledgement)
    fn abort_callback(
        &self,
        request_id: Uuid,
        flag: Arc<AtomicBool>,
        gate: Option<Arc<EnumerationGate>>,
    ) -> Box<dyn Fn() + Send + Sync> {
        let proxy = self.runner.proxy();
        Box::new(move || {
            flag.store(true, Ordering::SeqCst);
            if let Some(gate) = &gate {
                gate.wake();
            }
            if let Some(endpoint) = &proxy {
                endpoint.send_control(request_id, ControlMessage::Abort);
            }
        })
    }

    fn next_callback(
        &self,
        request_id: Uuid,
        gate: Arc<EnumerationGate>,
    ) -> Box<dyn Fn() + Send + Sync> {
        let proxy = self.runner.proxy();
        Box::new(move || match &proxy {
            Some(endpoint) => endpoint.send_control(request_id, ControlMessage::NextEnumerate),
            None => gate.release_next(),
        })
    }

    fn progress_route(&self, promise: &Arc<AbortableProgressHandle>) -> ProgressRoute {
        match self.runner.role() {
            ProcessRole::Privileged => ProgressRoute::Local {
                handle: promise.clone(),
                owning: self.runner.owning_sink(),
            },
            // Content-side progress arrives as notify frames instead
            ProcessRole::Content => ProgressRoute::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::executor::EventQueue;
    use crate::filesystem::StorageFileSystem;
    use crate::promise::{HandleState, TaskValue};
    use ipc_proto::NotifyValue;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    struct Engine {
        _root: tempfile::TempDir,
        filesystem: Arc<dyn FileSystemOps>,
        queue: EventQueue,
        runner: Arc<TaskRunner>,
    }

    fn engine(area: &str) -> Engine {
        let root = tempfile::tempdir().unwrap();
        let filesystem: Arc<dyn FileSystemOps> =
            Arc::new(StorageFileSystem::new(area, root.path().to_path_buf()));
        let queue = EventQueue::new();
        let runner = TaskRunner::privileged(queue.sink(), CoreConfig::default());
        Engine { _root: root, filesystem, queue, runner }
    }

    impl Engine {
        fn root_dir(&self) -> Directory {
            Directory::root(&self.filesystem, self.runner.clone())
        }

        fn local_path(&self, virtual_path: &str) -> std::path::PathBuf {
            VirtualPath::from_trusted(virtual_path).to_local(self._root.path())
        }

        fn settle(&self, handle: &AbortableHandle) -> Result<TaskValue, ErrorCode> {
            let deadline = Instant::now() + Duration::from_secs(5);
            while handle.state() == HandleState::Pending {
                assert!(Instant::now() < deadline, "handle did not settle");
                self.queue.pump_blocking(Duration::from_millis(20));
            }
            handle.result().expect("settled handle has a result")
        }
    }

    #[test]
    fn test_create_directory_then_path_exists() {
        let engine = engine("t-create-dir");
        let root = engine.root_dir();

        assert!(matches!(
            engine.settle(&root.create_directory("a")),
            Ok(TaskValue::Directory(_))
        ));

        let result = engine.settle(&root.create_directory("a/b"));
        match result {
            Ok(TaskValue::Directory(path)) => assert_eq!(path.as_str(), "a/b"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(engine.local_path("a/b").is_dir());

        // The identical request again fails
        assert_eq!(
            engine.settle(&root.create_directory("a/b")),
            Err(ErrorCode::PathExists)
        );
    }

    #[test]
    fn test_create_directory_invalid_path_short_circuits() {
        let engine = engine("t-create-dir-invalid");
        let root = engine.root_dir();

        for bad in ["../escape", "a/../b", "a//b", ""] {
            assert_eq!(
                engine.settle(&root.create_directory(bad)),
                Err(ErrorCode::InvalidPath),
                "path: {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_create_file_replace_semantics() {
        let engine = engine("t-create-file");
        let root = engine.root_dir();

        let result = engine.settle(&root.create_file(
            "f.bin",
            ContentSource::Bytes(vec![7u8; 100]),
            false,
        ));
        assert!(matches!(result, Ok(TaskValue::File(_))));
        assert_eq!(engine.local_path("f.bin").metadata().unwrap().len(), 100);

        // Same path again without replace
        assert_eq!(
            engine.settle(&root.create_file("f.bin", ContentSource::Bytes(vec![1u8; 10]), false)),
            Err(ErrorCode::PathExists)
        );

        // With replace the content is fully overwritten
        let result =
            engine.settle(&root.create_file("f.bin", ContentSource::Bytes(vec![1u8; 10]), true));
        assert!(result.is_ok());
        assert_eq!(engine.local_path("f.bin").metadata().unwrap().len(), 10);
    }

    #[test]
    fn test_create_file_from_stream() {
        let engine = engine("t-create-file-stream");
        let root = engine.root_dir();

        let reader = Box::new(std::io::Cursor::new(b"streamed content".to_vec()));
        let result =
            engine.settle(&root.create_file("s.txt", ContentSource::Stream(reader), false));
        assert!(result.is_ok());
        assert_eq!(
            std::fs::read(engine.local_path("s.txt")).unwrap(),
            b"streamed content"
        );
    }

    #[test]
    fn test_create_file_over_directory_is_type_mismatch() {
        let engine = engine("t-create-file-dir");
        let root = engine.root_dir();
        engine.settle(&root.create_directory("d")).unwrap();

        assert_eq!(
            engine.settle(&root.create_file("d", ContentSource::Bytes(vec![1]), true)),
            Err(ErrorCode::TypeMismatch)
        );
    }

    #[test]
    fn test_get_root_auto_creates() {
        let outer = tempfile::tempdir().unwrap();
        let absent_root = outer.path().join("area-root");
        let filesystem: Arc<dyn FileSystemOps> =
            Arc::new(StorageFileSystem::new("t-get-root", absent_root.clone()));
        let queue = EventQueue::new();
        let runner = TaskRunner::privileged(queue.sink(), CoreConfig::default());

        let handle = Directory::get_root(&filesystem, runner.clone());
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.state() == HandleState::Pending {
            assert!(Instant::now() < deadline, "handle did not settle");
            queue.pump_blocking(Duration::from_millis(20));
        }

        match handle.result().unwrap() {
            Ok(TaskValue::Directory(path)) => {
                assert!(path.is_root());
                let dir = Directory::new(&filesystem, path, runner);
                assert_eq!(dir.name(), "t-get-root");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(absent_root.is_dir());
    }

    #[test]
    fn test_get_file_and_not_found() {
        let engine = engine("t-get");
        let root = engine.root_dir();
        engine
            .settle(&root.create_file("f.txt", ContentSource::Bytes(vec![1, 2, 3]), false))
            .unwrap();

        match engine.settle(&root.get("f.txt")) {
            Ok(TaskValue::File(file)) => {
                let path = engine.filesystem.resolve_file_ref(&file).unwrap();
                assert_eq!(path.as_str(), "f.txt");
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert_eq!(engine.settle(&root.get("missing")), Err(ErrorCode::NotFound));
    }

    #[test]
    fn test_remove_absent_is_false_not_error() {
        let engine = engine("t-remove-absent");
        let root = engine.root_dir();

        assert_eq!(
            engine.settle(&root.remove(RemoveTarget::Relative("nothing".to_string()))),
            Ok(TaskValue::Boolean(false))
        );
    }

    #[test]
    fn test_remove_non_empty_requires_deep() {
        let engine = engine("t-remove-deep");
        let root = engine.root_dir();
        engine.settle(&root.create_directory("d")).unwrap();
        engine
            .settle(&root.create_file("d/inner.txt", ContentSource::Bytes(vec![1]), false))
            .unwrap();

        assert_eq!(
            engine.settle(&root.remove(RemoveTarget::Relative("d".to_string()))),
            Err(ErrorCode::NoModificationAllowed)
        );
        assert!(engine.local_path("d").exists());

        assert_eq!(
            engine.settle(&root.remove_deep(RemoveTarget::Relative("d".to_string()))),
            Ok(TaskValue::Boolean(true))
        );
        assert!(!engine.local_path("d").exists());
    }

    #[test]
    fn test_remove_by_ref_is_scope_checked() {
        let engine = engine("t-remove-ref");
        let root = engine.root_dir();
        engine.settle(&root.create_directory("inside")).unwrap();
        engine.settle(&root.create_directory("outside")).unwrap();

        let file = match engine
            .settle(&root.create_file("outside/f.txt", ContentSource::Bytes(vec![1]), false))
        {
            Ok(TaskValue::File(file)) => file,
            other => panic!("unexpected result: {:?}", other),
        };

        // A directory may only remove its own descendants
        let inside = Directory::new(
            &engine.filesystem,
            VirtualPath::from_trusted("inside"),
            engine.runner.clone(),
        );
        assert_eq!(
            engine.settle(&inside.remove(RemoveTarget::Ref(file))),
            Err(ErrorCode::NoModificationAllowed)
        );

        assert_eq!(
            engine.settle(&root.remove(RemoveTarget::Ref(file))),
            Ok(TaskValue::Boolean(true))
        );
        assert!(!engine.local_path("outside/f.txt").exists());
    }

    #[test]
    fn test_move_file_reports_progress() {
        let engine = engine("t-move-file");
        let root = engine.root_dir();
        engine.settle(&root.create_directory("dest")).unwrap();
        engine
            .settle(&root.create_file("f.txt", ContentSource::Bytes(b"payload".to_vec()), false))
            .unwrap();

        let moved = Arc::new(Mutex::new(Vec::new()));
        let handle = root.move_item(
            MoveSource::Relative("f.txt".to_string()),
            MoveDestination::Relative("dest/f.txt".to_string()),
        );
        let moved_clone = moved.clone();
        handle.on_progress(Box::new(move |value| {
            moved_clone.lock().push(value.clone());
        }));

        assert_eq!(engine.settle(handle.handle()), Ok(TaskValue::Void));
        assert!(!engine.local_path("f.txt").exists());
        assert_eq!(
            std::fs::read(engine.local_path("dest/f.txt")).unwrap(),
            b"payload"
        );
        assert_eq!(*moved.lock(), vec![NotifyValue::Path("f.txt".to_string())]);
    }

    #[test]
    fn test_move_onto_existing_dest_leaves_source() {
        let engine = engine("t-move-exists");
        let root = engine.root_dir();
        engine
            .settle(&root.create_file("src.txt", ContentSource::Bytes(b"src".to_vec()), false))
            .unwrap();
        engine
            .settle(&root.create_file("dst.txt", ContentSource::Bytes(b"dst".to_vec()), false))
            .unwrap();

        let handle = root.move_item(
            MoveSource::Relative("src.txt".to_string()),
            MoveDestination::Relative("dst.txt".to_string()),
        );
        assert_eq!(engine.settle(handle.handle()), Err(ErrorCode::PathExists));

        assert_eq!(std::fs::read(engine.local_path("src.txt")).unwrap(), b"src");
        assert_eq!(std::fs::read(engine.local_path("dst.txt")).unwrap(), b"dst");
    }

    #[test]
    fn test_move_into_own_descendant_is_invalid_modification() {
        let engine = engine("t-move-self");
        let root = engine.root_dir();
        engine.settle(&root.create_directory("d")).unwrap();
        engine.settle(&root.create_directory("d/sub")).unwrap();

        let handle = root.move_item(
            MoveSource::Relative("d".to_string()),
            MoveDestination::Relative("d/sub/d".to_string()),
        );
        assert_eq!(
            engine.settle(handle.handle()),
            Err(ErrorCode::InvalidModification)
        );

        let handle = root.move_item(
            MoveSource::Relative("d".to_string()),
            MoveDestination::Relative("d".to_string()),
        );
        assert_eq!(
            engine.settle(handle.handle()),
            Err(ErrorCode::InvalidModification)
        );
    }

    #[test]
    fn test_move_aborted_never_reports_success() {
        let engine = engine("t-move-abort");
        let root = engine.root_dir();
        engine.settle(&root.create_directory("tree")).unwrap();
        engine.settle(&root.create_directory("dest")).unwrap();
        engine
            .settle(&root.create_file("tree/f.txt", ContentSource::Bytes(vec![1]), false))
            .unwrap();

        let handle = root.move_item(
            MoveSource::Relative("tree".to_string()),
            MoveDestination::Relative("dest/tree".to_string()),
        );
        handle.abort();

        assert_eq!(engine.settle(handle.handle()), Err(ErrorCode::Aborted));
    }

    #[test]
    fn test_enumerate_recursive_is_paced() {
        let engine = engine("t-enumerate");
        let root = engine.root_dir();
        engine.settle(&root.create_directory("x")).unwrap();
        engine.settle(&root.create_directory("x/y")).unwrap();
        engine
            .settle(&root.create_file("x/f1", ContentSource::Bytes(vec![1]), false))
            .unwrap();
        engine
            .settle(&root.create_file("x/y/f2", ContentSource::Bytes(vec![2]), false))
            .unwrap();

        let batches: Arc<Mutex<Vec<Vec<ipc_proto::EntryInfo>>>> = Arc::new(Mutex::new(Vec::new()));
        let handle = root.enumerate(Some("x"), true);
        let batches_clone = batches.clone();
        handle.on_progress(Box::new(move |value| {
            if let NotifyValue::Entries(entries) = value {
                batches_clone.lock().push(entries.clone());
            }
        }));

        // Level 1 arrives without any next signal
        let deadline = Instant::now() + Duration::from_secs(5);
        while batches.lock().len() < 1 {
            assert!(Instant::now() < deadline, "first level never arrived");
            engine.queue.pump_blocking(Duration::from_millis(20));
        }
        {
            let batches = batches.lock();
            let mut level1: Vec<&str> = batches[0].iter().map(|e| e.path.as_str()).collect();
            level1.sort();
            assert_eq!(level1, vec!["x/f1", "x/y"]);
            assert!(batches[0].iter().any(|e| e.path == "x/y" && e.is_dir));
        }
        assert_eq!(handle.state(), HandleState::Pending);

        // The consumer signals readiness; level 2 follows and the task ends
        handle.request_next();
        assert_eq!(engine.settle(handle.handle()), Ok(TaskValue::Void));

        let batches = batches.lock();
        assert_eq!(batches.len(), 2);
        let level2: Vec<&str> = batches[1].iter().map(|e| e.path.as_str()).collect();
        assert_eq!(level2, vec!["x/y/f2"]);
    }

    #[test]
    fn test_enumerate_file_is_type_mismatch() {
        let engine = engine("t-enumerate-file");
        let root = engine.root_dir();
        engine
            .settle(&root.create_file("f.txt", ContentSource::Bytes(vec![1]), false))
            .unwrap();

        let handle = root.enumerate(Some("f.txt"), false);
        assert_eq!(engine.settle(handle.handle()), Err(ErrorCode::TypeMismatch));
    }

    #[test]
    fn test_torn_down_filesystem_settles_nothing() {
        let root_dir = tempfile::tempdir().unwrap();
        let queue = EventQueue::new();
        let runner = TaskRunner::privileged(queue.sink(), CoreConfig::default());

        let filesystem: Arc<dyn FileSystemOps> = Arc::new(StorageFileSystem::new(
            "t-torn-down",
            root_dir.path().to_path_buf(),
        ));
        let dir = Directory::root(&filesystem, runner);

        let handle = dir.create_directory("a");
        drop(filesystem);
        drop(dir);

        // Pump well past completion; the callback silently no-ops
        let deadline = Instant::now() + Duration::from_millis(500);
        while Instant::now() < deadline {
            queue.pump_blocking(Duration::from_millis(20));
        }
        assert_eq!(handle.state(), HandleState::Pending);
    }
}
