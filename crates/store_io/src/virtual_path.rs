//! VirtualPath - normalized storage-relative path handling
//!
//! A virtual path is what callers of a storage area see: forward-slash
//! separated, relative to the area root, with the empty string standing for
//! the root itself. Separator conversion to the host platform happens only
//! at the `to_local` boundary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

/// Virtual path separator exposed to callers on every platform
pub const SEPARATOR: char = '/';

/// A normalized path relative to a storage area root
///
/// Invariants (enforced by every constructor except deserialization from a
/// trusted peer):
/// - no `.` or `..` segments
/// - no empty segments, no leading or trailing separator
/// - the empty string is the area root
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct VirtualPath {
    path: String,

    /// Hash-based ID for registry lookups, recomputed on deserialization
    id: u64,
}

impl VirtualPath {
    /// The root of a storage area
    pub fn root() -> Self {
        Self::from_trusted(String::new())
    }

    /// Wrap an already-normalized path without re-validating it
    ///
    /// Used when the path comes from a source that only ever produces
    /// normalized paths (this type, or a wire peer).
    pub fn from_trusted(path: impl Into<String>) -> Self {
        let path = path.into();
        let id = xxh3_64(path.as_bytes());
        Self { path, id }
    }

    /// Normalize a caller-supplied relative path
    ///
    /// Accepts an optional `./` prefix and an optional trailing separator,
    /// both of which are stripped. Returns `None` for anything containing
    /// `.`/`..`/empty segments or for an empty input.
    pub fn normalize(input: &str) -> Option<String> {
        let trimmed = input.strip_prefix("./").unwrap_or(input);
        let trimmed = trimmed.strip_suffix(SEPARATOR).unwrap_or(trimmed);
        if trimmed.is_empty() {
            return None;
        }
        for segment in trimmed.split(SEPARATOR) {
            if segment.is_empty() || segment == "." || segment == ".." {
                return None;
            }
        }
        Some(trimmed.to_string())
    }

    /// Resolve a caller-supplied relative path against this path
    pub fn child(&self, relative: &str) -> Option<VirtualPath> {
        let normalized = Self::normalize(relative)?;
        if self.path.is_empty() {
            Some(Self::from_trusted(normalized))
        } else {
            Some(Self::from_trusted(format!("{}{}{}", self.path, SEPARATOR, normalized)))
        }
    }

    /// Append a single already-validated name segment
    pub fn join_name(&self, name: &str) -> Option<VirtualPath> {
        if name.contains(SEPARATOR) {
            return None;
        }
        self.child(name)
    }

    /// Whether this path lies strictly below `dir` (or `dir` is the root)
    pub fn is_descendant_of(&self, dir: &VirtualPath) -> bool {
        if dir.path.is_empty() {
            return !self.path.is_empty();
        }
        self.path.len() > dir.path.len()
            && self.path.starts_with(&dir.path)
            && self.path.as_bytes()[dir.path.len()] == SEPARATOR as u8
    }

    /// Last path segment; empty for the root
    pub fn leaf_name(&self) -> &str {
        match self.path.rfind(SEPARATOR) {
            Some(idx) => &self.path[idx + 1..],
            None => &self.path,
        }
    }

    /// Parent path; `None` for the root
    pub fn parent(&self) -> Option<VirtualPath> {
        if self.path.is_empty() {
            return None;
        }
        match self.path.rfind(SEPARATOR) {
            Some(idx) => Some(Self::from_trusted(self.path[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Is this the area root?
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Hash ID for registry lookups
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Map to a host path beneath the given local root
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut local = root.to_path_buf();
        for segment in self.path.split(SEPARATOR) {
            if !segment.is_empty() {
                local.push(segment);
            }
        }
        local
    }
}

impl From<String> for VirtualPath {
    fn from(path: String) -> Self {
        Self::from_trusted(path)
    }
}

impl From<VirtualPath> for String {
    fn from(path: VirtualPath) -> Self {
        path.path
    }
}

impl std::fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}
