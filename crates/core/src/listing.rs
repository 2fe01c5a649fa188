use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::fs::EntryKind;
use crate::tasks::CancelToken;

/// One child of a listed folder.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub path: PathBuf,
    pub name: OsString,
    pub kind: EntryKind,
    pub size: u64,
}

/// Lists the direct children of `dir`, sorted by name. Symlinks are
/// reported as links, not followed. Any read error aborts the listing.
pub fn list_directory(dir: &Path, cancel: &CancelToken) -> Result<Vec<DirectoryEntry>> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    if !fs::metadata(dir)?.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "not a directory: {}",
            dir.to_string_lossy()
        )));
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let entry = entry.map_err(walk_error)?;
        let md = entry.metadata().map_err(walk_error)?;
        let file_type = entry.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        entries.push(DirectoryEntry {
            path: entry.path().to_path_buf(),
            name: entry.file_name().to_os_string(),
            kind,
            size: md.len(),
        });
    }

    Ok(entries)
}

fn walk_error(err: walkdir::Error) -> Error {
    Error::Io(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_one_level_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        fs::write(dir.path().join("sub/deeper/x"), b"x").unwrap();
        fs::write(dir.path().join("top.txt"), b"12345").unwrap();

        let entries = list_directory(dir.path(), &CancelToken::new()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "sub");
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[1].name, "top.txt");
        assert_eq!(entries[1].kind, EntryKind::File);
        assert_eq!(entries[1].size, 5);
    }

    #[test]
    fn cancelled_listing_returns_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            list_directory(dir.path(), &cancel),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn missing_or_plain_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"").unwrap();

        assert!(matches!(
            list_directory(&dir.path().join("missing"), &CancelToken::new()),
            Err(Error::Io(_))
        ));
        assert!(matches!(
            list_directory(&file, &CancelToken::new()),
            Err(Error::InvalidArgument(_))
        ));
    }
}
