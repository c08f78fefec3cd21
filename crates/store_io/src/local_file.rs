//! LocalFile - a handle over one node of the backing store

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A handle to a single file or directory on the backing store
///
/// Thin wrapper over `std::fs`; existence and type checks are separate
/// queries, matching the probe-then-act shape of the task layer. Callers
/// that need atomicity use the exclusive-create entry points.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last path component, lossy UTF-8
    pub fn leaf_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn is_dir(&self) -> bool {
        self.path.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.path.is_file()
    }

    /// Whether the node itself is a symlink (not followed)
    pub fn is_symlink(&self) -> bool {
        fs::symlink_metadata(&self.path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    pub fn size(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Create this directory; the parent must already exist
    pub fn create_dir(&self) -> io::Result<()> {
        fs::create_dir(&self.path)?;
        tracing::debug!("Created directory: {}", self.path.display());
        Ok(())
    }

    /// Create this directory and any missing ancestors
    pub fn create_dir_all(&self) -> io::Result<()> {
        fs::create_dir_all(&self.path)?;
        tracing::debug!("Created directory tree: {}", self.path.display());
        Ok(())
    }

    /// Create a new empty file; fails with `AlreadyExists` if present
    pub fn create_file_exclusive(&self) -> io::Result<fs::File> {
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
    }

    /// Open for writing, truncating existing content
    pub fn open_truncate(&self) -> io::Result<fs::File> {
        fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
    }

    /// Remove this node
    ///
    /// A non-empty directory is only removed when `recursive` is set; the
    /// non-recursive variant surfaces the platform's not-empty error.
    pub fn remove(&self, recursive: bool) -> io::Result<()> {
        if self.is_dir() {
            if recursive {
                fs::remove_dir_all(&self.path)?;
            } else {
                fs::remove_dir(&self.path)?;
            }
        } else {
            fs::remove_file(&self.path)?;
        }
        tracing::debug!("Removed: {}", self.path.display());
        Ok(())
    }

    /// Rename this node to the destination path
    pub fn rename_to(&self, dest: &LocalFile) -> io::Result<()> {
        fs::rename(&self.path, &dest.path)
    }

    /// Copy this file's content to the destination path
    pub fn copy_file_to(&self, dest: &LocalFile) -> io::Result<u64> {
        fs::copy(&self.path, &dest.path)
    }

    /// Immediate children of this directory
    pub fn children(&self) -> io::Result<Vec<LocalFile>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            entries.push(LocalFile::new(entry?.path()));
        }
        Ok(entries)
    }
}

/// Whether an I/O error reports a cross-filesystem rename
///
/// Unix: EXDEV = 18, Windows: ERROR_NOT_SAME_DEVICE = 17
pub fn is_cross_device_error(err: &io::Error) -> bool {
    match err.raw_os_error() {
        Some(18) => cfg!(unix),
        Some(17) => cfg!(windows),
        _ => false,
    }
}
