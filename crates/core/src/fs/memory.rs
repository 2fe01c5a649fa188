//! In-memory filesystem tree.
//!
//! Lets callers stage situations a scratch directory cannot: entries on a
//! different mount, directories that refuse to be listed even for root, and
//! entries whose metadata query fails.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use super::{ChildEntry, ChildIter, EntryInfo, EntryKind, FileSystem, FsId};

const MAX_LINK_DEPTH: usize = 40;

#[derive(Debug, Clone)]
struct Node {
    kind: EntryKind,
    size: u64,
    readable: bool,
    stat_fails: bool,
    target: Option<PathBuf>,
}

impl Node {
    fn new(kind: EntryKind, size: u64) -> Self {
        Self {
            kind,
            size,
            readable: true,
            stat_fails: false,
            target: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    default_fs: FsId,
    mounts: BTreeMap<PathBuf, FsId>,
    nodes: BTreeMap<PathBuf, Node>,
}

impl MemoryFileSystem {
    pub fn new(fs_id: impl Into<String>) -> Self {
        Self {
            default_fs: FsId::new(fs_id),
            mounts: BTreeMap::new(),
            nodes: BTreeMap::new(),
        }
    }

    /// Adds a directory, creating missing parents.
    pub fn dir(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.insert(path.as_ref(), Node::new(EntryKind::Directory, 0));
        self
    }

    /// Adds a regular file of `size` bytes, creating missing parents.
    pub fn file(&mut self, path: impl AsRef<Path>, size: u64) -> &mut Self {
        self.insert(path.as_ref(), Node::new(EntryKind::File, size));
        self
    }

    /// Adds a directory that starts a different filesystem. Everything below
    /// it reports `fs_id` unless a deeper mount says otherwise.
    pub fn mount(&mut self, path: impl AsRef<Path>, fs_id: impl Into<String>) -> &mut Self {
        let path = path.as_ref();
        self.dir(path);
        self.mounts.insert(path.to_path_buf(), FsId::new(fs_id));
        self
    }

    /// Adds a symbolic link to `target`. The link's own size is the length
    /// of the target path.
    pub fn symlink(&mut self, path: impl AsRef<Path>, target: impl AsRef<Path>) -> &mut Self {
        let target = target.as_ref().to_path_buf();
        let mut node = Node::new(EntryKind::Symlink, target.as_os_str().len() as u64);
        node.target = Some(target);
        self.insert(path.as_ref(), node);
        self
    }

    /// Makes listing the directory at `path` fail with `PermissionDenied`.
    pub fn unreadable(&mut self, path: impl AsRef<Path>) -> &mut Self {
        let path = path.as_ref();
        if !self.nodes.contains_key(path) {
            self.dir(path);
        }
        if let Some(node) = self.nodes.get_mut(path) {
            node.readable = false;
        }
        self
    }

    /// Makes every metadata query for `path` fail.
    pub fn broken(&mut self, path: impl AsRef<Path>) -> &mut Self {
        let path = path.as_ref();
        if !self.nodes.contains_key(path) {
            self.file(path, 0);
        }
        if let Some(node) = self.nodes.get_mut(path) {
            node.stat_fails = true;
        }
        self
    }

    fn insert(&mut self, path: &Path, node: Node) {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.nodes
                .entry(ancestor.to_path_buf())
                .or_insert_with(|| Node::new(EntryKind::Directory, 0));
        }
        self.nodes.insert(path.to_path_buf(), node);
    }

    fn fs_id_of(&self, path: &Path) -> FsId {
        path.ancestors()
            .find_map(|ancestor| self.mounts.get(ancestor))
            .unwrap_or(&self.default_fs)
            .clone()
    }

    fn lookup(&self, path: &Path) -> io::Result<&Node> {
        self.nodes.get(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such entry: {}", path.display()),
            )
        })
    }

    /// Follows symlinks when asked, returning the path whose node describes
    /// the entry. A dangling link resolves to itself.
    fn resolve(&self, path: &Path, follow_symlinks: bool) -> io::Result<PathBuf> {
        let mut current = path.to_path_buf();
        if !follow_symlinks {
            return Ok(current);
        }
        for _ in 0..MAX_LINK_DEPTH {
            let node = self.lookup(&current)?;
            match &node.target {
                Some(target) if self.nodes.contains_key(target) => current = target.clone(),
                _ => return Ok(current),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("too many levels of symbolic links: {}", path.display()),
        ))
    }

    fn info(&self, path: &Path, follow_symlinks: bool) -> io::Result<EntryInfo> {
        if self.lookup(path)?.stat_fails {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("metadata query failed: {}", path.display()),
            ));
        }
        let resolved = self.resolve(path, follow_symlinks)?;
        let node = self.lookup(&resolved)?;
        Ok(EntryInfo {
            kind: node.kind,
            size: node.size,
            fs_id: self.fs_id_of(&resolved),
        })
    }
}

impl FileSystem for MemoryFileSystem {
    fn stat(&self, path: &Path, follow_symlinks: bool) -> io::Result<EntryInfo> {
        self.info(path, follow_symlinks)
    }

    fn list_dir<'a>(&'a self, path: &Path, follow_symlinks: bool) -> io::Result<ChildIter<'a>> {
        let dir = self.resolve(path, follow_symlinks)?;
        let node = self.lookup(&dir)?;
        if !node.kind.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("not a directory: {}", path.display()),
            ));
        }
        if !node.readable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {}", path.display()),
            ));
        }

        let children: Vec<PathBuf> = self
            .nodes
            .keys()
            .filter(|candidate| candidate.parent() == Some(dir.as_path()))
            .cloned()
            .collect();

        Ok(Box::new(children.into_iter().map(move |child| {
            let info = self.info(&child, follow_symlinks)?;
            Ok(ChildEntry {
                name: child.file_name().map(|n| n.to_os_string()).unwrap_or_default(),
                info,
            })
        })))
    }
}
