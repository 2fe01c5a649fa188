use std::fs::{self, Metadata};
use std::io;
use std::path::Path;

use super::{ChildEntry, ChildIter, EntryInfo, EntryKind, FileSystem, FsId};

/// The real disk, through `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn stat(&self, path: &Path, follow_symlinks: bool) -> io::Result<EntryInfo> {
        let md = if follow_symlinks {
            // A dangling link still gets counted, as the link itself.
            fs::metadata(path).or_else(|_| fs::symlink_metadata(path))?
        } else {
            fs::symlink_metadata(path)?
        };
        Ok(entry_info(&md))
    }

    fn list_dir<'a>(&'a self, path: &Path, follow_symlinks: bool) -> io::Result<ChildIter<'a>> {
        let read_dir = fs::read_dir(path)?;
        Ok(Box::new(read_dir.map(move |entry| {
            let entry = entry?;
            let md = if follow_symlinks {
                fs::metadata(entry.path()).or_else(|_| entry.metadata())?
            } else {
                entry.metadata()?
            };
            Ok(ChildEntry {
                name: entry.file_name(),
                info: entry_info(&md),
            })
        })))
    }
}

fn entry_info(md: &Metadata) -> EntryInfo {
    let file_type = md.file_type();
    let kind = if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    };

    EntryInfo {
        kind,
        size: md.len(),
        fs_id: fs_id(md),
    }
}

#[cfg(unix)]
fn fs_id(md: &Metadata) -> FsId {
    use std::os::unix::fs::MetadataExt;

    FsId::new(md.dev().to_string())
}

#[cfg(not(unix))]
fn fs_id(_md: &Metadata) -> FsId {
    FsId::default()
}
