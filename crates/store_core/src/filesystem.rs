//! Filesystem capability - resolves virtual paths to local file handles
//!
//! A filesystem is identified by a canonical string ("storage-" + area).
//! Tasks hold it weakly: an outstanding background operation must never keep
//! a torn-down owning context alive, so every access re-resolves the weak
//! handle and treats "gone" as a silent no-op.

use dashmap::DashMap;
use ipc_proto::FileRef;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use store_io::{LocalFile, VirtualPath};
use uuid::Uuid;

/// Canonical-string prefix for storage-area filesystems
const STORAGE_PREFIX: &str = "storage-";

/// The capability interface every task runs against
pub trait FileSystemOps: Send + Sync {
    /// Canonical string, e.g. `storage-pictures`
    fn canonical_name(&self) -> &str;

    /// Caller-visible name of the root directory
    fn root_name(&self) -> &str;

    /// Prefix for permission checks, combined with the operation's access
    /// type as `"{permission_name}-{access}"`
    fn permission_name(&self) -> &str;

    /// Resolve a virtual path to a local handle; `None` means the path
    /// cannot be mapped (caller translates to InvalidPath)
    fn local_file(&self, path: &VirtualPath) -> Option<LocalFile>;

    /// Whether a resolved handle is safe to touch; concrete filesystems
    /// override this to reject e.g. symlink escapes
    fn is_safe_file(&self, file: &LocalFile) -> bool {
        let _ = file;
        true
    }

    /// Map a previously-vended file handle back to its virtual path
    fn resolve_file_ref(&self, file: &FileRef) -> Option<VirtualPath>;

    /// Vend an opaque handle for a file result
    fn vend_file_ref(&self, path: &VirtualPath) -> FileRef;
}

/// Non-owning reference to a filesystem capability
#[derive(Clone)]
pub struct FileSystemWeakRef {
    inner: Weak<dyn FileSystemOps>,
}

impl FileSystemWeakRef {
    pub fn new(filesystem: &Arc<dyn FileSystemOps>) -> Self {
        Self { inner: Arc::downgrade(filesystem) }
    }

    /// Re-resolve to a strong reference; `None` once the owning context is
    /// torn down
    pub fn get(&self) -> Option<Arc<dyn FileSystemOps>> {
        self.inner.upgrade()
    }
}

/// Process-wide table of storage areas available to the privileged process
///
/// Areas are registered at startup (area name -> local root); the channel
/// dispatcher checks filesystems out of this table by canonical string.
pub struct StorageRegistry;

static STORAGE_ROOTS: Lazy<RwLock<HashMap<String, PathBuf>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

impl StorageRegistry {
    /// Register a storage area root; replaces any previous registration
    pub fn register(area: &str, root: PathBuf) {
        tracing::info!("Registered storage area {} at {}", area, root.display());
        STORAGE_ROOTS.write().insert(area.to_string(), root);
    }

    pub fn unregister(area: &str) {
        STORAGE_ROOTS.write().remove(area);
    }

    /// Create a privileged-process filesystem from its canonical string
    pub fn from_string(canonical: &str) -> Option<Arc<dyn FileSystemOps>> {
        let area = canonical.strip_prefix(STORAGE_PREFIX)?;
        let root = STORAGE_ROOTS.read().get(area).cloned()?;
        Some(Arc::new(StorageFileSystem::new(area, root)))
    }
}

/// A storage-area filesystem
///
/// The privileged-process form carries the local root and resolves paths;
/// the content-process form carries no root (path resolution only ever
/// happens in the privileged process).
pub struct StorageFileSystem {
    canonical: String,
    area: String,
    permission: String,
    local_root: Option<PathBuf>,
}

/// Vended file handles, id -> (canonical filesystem, virtual path)
static FILE_REFS: Lazy<DashMap<Uuid, (String, VirtualPath)>> = Lazy::new(DashMap::new);

impl StorageFileSystem {
    /// Privileged-process filesystem over a local root
    pub fn new(area: &str, local_root: PathBuf) -> Self {
        Self {
            canonical: format!("{}{}", STORAGE_PREFIX, area),
            area: area.to_string(),
            permission: format!("storage:{}", area),
            local_root: Some(local_root),
        }
    }

    /// Content-process filesystem; names only, no local root
    pub fn for_content(area: &str) -> Self {
        Self {
            canonical: format!("{}{}", STORAGE_PREFIX, area),
            area: area.to_string(),
            permission: format!("storage:{}", area),
            local_root: None,
        }
    }
}

impl FileSystemOps for StorageFileSystem {
    fn canonical_name(&self) -> &str {
        &self.canonical
    }

    fn root_name(&self) -> &str {
        &self.area
    }

    fn permission_name(&self) -> &str {
        &self.permission
    }

    fn local_file(&self, path: &VirtualPath) -> Option<LocalFile> {
        let root = self.local_root.as_ref()?;
        Some(LocalFile::new(path.to_local(root)))
    }

    fn is_safe_file(&self, file: &LocalFile) -> bool {
        // A storage area never vends symlinks; one on disk is an escape
        // attempt or corruption either way.
        !file.is_symlink()
    }

    fn resolve_file_ref(&self, file: &FileRef) -> Option<VirtualPath> {
        let entry = FILE_REFS.get(&file.id)?;
        let (canonical, path) = entry.value();
        if canonical != &self.canonical {
            return None;
        }
        Some(path.clone())
    }

    fn vend_file_ref(&self, path: &VirtualPath) -> FileRef {
        let file = FileRef::new();
        FILE_REFS.insert(file.id, (self.canonical.clone(), path.clone()));
        file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        StorageRegistry::register("reg-test", dir.path().to_path_buf());

        let fs = StorageRegistry::from_string("storage-reg-test").unwrap();
        assert_eq!(fs.canonical_name(), "storage-reg-test");
        assert_eq!(fs.root_name(), "reg-test");

        StorageRegistry::unregister("reg-test");
        assert!(StorageRegistry::from_string("storage-reg-test").is_none());
        assert!(StorageRegistry::from_string("other-reg-test").is_none());
    }

    #[test]
    fn test_weak_ref_goes_silent() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystemOps> =
            Arc::new(StorageFileSystem::new("weak-test", dir.path().to_path_buf()));
        let weak = FileSystemWeakRef::new(&fs);

        assert!(weak.get().is_some());
        drop(fs);
        assert!(weak.get().is_none());
    }

    #[test]
    fn test_file_ref_vend_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let fs = StorageFileSystem::new("ref-test", dir.path().to_path_buf());
        let other = StorageFileSystem::new("ref-other", dir.path().to_path_buf());

        let path = VirtualPath::root().child("a/b.txt").unwrap();
        let vended = fs.vend_file_ref(&path);

        assert_eq!(fs.resolve_file_ref(&vended), Some(path));
        // A handle vended by one filesystem never resolves through another
        assert_eq!(other.resolve_file_ref(&vended), None);
        assert_eq!(fs.resolve_file_ref(&FileRef::new()), None);
    }

    #[test]
    fn test_local_file_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let fs = StorageFileSystem::new("res-test", dir.path().to_path_buf());
        let path = VirtualPath::root().child("sub/name.txt").unwrap();

        let local = fs.local_file(&path).unwrap();
        assert_eq!(local.path(), dir.path().join("sub").join("name.txt"));

        // Content-process instances cannot resolve paths
        let content_fs = StorageFileSystem::for_content("res-test");
        assert!(content_fs.local_file(&path).is_none());
    }
}
