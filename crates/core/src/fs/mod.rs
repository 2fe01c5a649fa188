//! Filesystem access used by the count engine.
//!
//! The engine only needs two queries: the metadata of a single path and a
//! streamed listing of a directory with the same metadata for each child.
//! Listing and metadata come back together so the engine never has to stat
//! a child a second time.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::Path;

pub mod local;
pub mod memory;

pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;

/// Opaque identity of the filesystem an entry lives on.
///
/// Two entries with equal ids are on the same mount. An empty id means the
/// platform does not expose one.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct FsId(String);

impl FsId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
    Other,
}

impl EntryKind {
    pub fn is_dir(self) -> bool {
        self == EntryKind::Directory
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub kind: EntryKind,
    pub size: u64,
    pub fs_id: FsId,
}

#[derive(Debug, Clone)]
pub struct ChildEntry {
    pub name: OsString,
    pub info: EntryInfo,
}

/// Lazily produced directory listing. Finite and not restartable.
pub type ChildIter<'a> = Box<dyn Iterator<Item = io::Result<ChildEntry>> + 'a>;

pub trait FileSystem: Send + Sync {
    fn stat(&self, path: &Path, follow_symlinks: bool) -> io::Result<EntryInfo>;

    fn list_dir<'a>(&'a self, path: &Path, follow_symlinks: bool) -> io::Result<ChildIter<'a>>;
}
