use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, trace};

use crate::error::CountError;
use crate::fs::{EntryInfo, FileSystem, FsId};
use crate::models::{CountOptions, CountSnapshot};
use crate::progress::ProgressThrottle;
use crate::tasks::CancelToken;

/// Counts files, directories and bytes below `roots`, depth-first and in the
/// order given.
///
/// Each root fixes the filesystem id for its own subtree; descendants on a
/// different filesystem are skipped without being counted. `on_progress`
/// receives a throttled copy of the counters each time a directory is
/// finished, plus one final copy when the whole run succeeds.
///
/// Failing to query a root, or to list the only root of the job, aborts the
/// run. Every other unreadable directory is counted in
/// `unreadable_directory_count` and skipped. Cancellation wins over any
/// error.
pub fn count_roots<F>(
    fs: &dyn FileSystem,
    roots: &[PathBuf],
    options: &CountOptions,
    cancel: &CancelToken,
    on_progress: F,
) -> Result<CountSnapshot, CountError>
where
    F: FnMut(&CountSnapshot),
{
    let mut counter = DeepCounter {
        fs,
        follow_symlinks: options.follow_symlinks,
        cancel,
        single_root: roots.len() < 2,
        totals: CountSnapshot::default(),
        throttle: ProgressThrottle::new(options.progress_interval),
        on_progress,
    };
    counter.run(roots)
}

enum Abort {
    Cancelled,
    Failed { path: PathBuf, source: io::Error },
}

struct DeepCounter<'a, F> {
    fs: &'a dyn FileSystem,
    follow_symlinks: bool,
    cancel: &'a CancelToken,
    single_root: bool,
    totals: CountSnapshot,
    throttle: ProgressThrottle,
    on_progress: F,
}

impl<F> DeepCounter<'_, F>
where
    F: FnMut(&CountSnapshot),
{
    fn run(&mut self, roots: &[PathBuf]) -> Result<CountSnapshot, CountError> {
        self.totals = CountSnapshot::default();
        self.throttle.reset();

        if self.cancel.is_cancelled() {
            return Err(CountError::Cancelled {
                partial: self.totals,
            });
        }

        for root in roots {
            if let Err(abort) = self.process(root, None, None) {
                return Err(self.classify(abort));
            }
        }

        if self.cancel.is_cancelled() {
            return Err(CountError::Cancelled {
                partial: self.totals,
            });
        }

        (self.on_progress)(&self.totals);
        Ok(self.totals)
    }

    fn classify(&self, abort: Abort) -> CountError {
        match abort {
            _ if self.cancel.is_cancelled() => CountError::Cancelled {
                partial: self.totals,
            },
            Abort::Cancelled => CountError::Cancelled {
                partial: self.totals,
            },
            Abort::Failed { path, source } => CountError::Io { path, source },
        }
    }

    fn check_cancelled(&self) -> Result<(), Abort> {
        if self.cancel.is_cancelled() {
            Err(Abort::Cancelled)
        } else {
            Ok(())
        }
    }

    /// `info` is `None` only for roots; children reuse the metadata that came
    /// with the listing. `toplevel` is `None` for roots too.
    fn process(
        &mut self,
        path: &Path,
        info: Option<EntryInfo>,
        toplevel: Option<&FsId>,
    ) -> Result<(), Abort> {
        self.check_cancelled()?;

        let is_root = toplevel.is_none();
        let info = match info {
            Some(info) => info,
            None => self
                .fs
                .stat(path, self.follow_symlinks)
                .map_err(|source| Abort::Failed {
                    path: path.to_path_buf(),
                    source,
                })?,
        };

        self.check_cancelled()?;

        // Only count what lives on the root's filesystem, so remote mounts
        // and virtual filesystems below it stay out of the totals.
        let toplevel = match toplevel {
            None => &info.fs_id,
            Some(id) if *id != info.fs_id => {
                trace!("skipping {}: different filesystem", path.display());
                return Ok(());
            }
            Some(id) => id,
        };

        if !info.kind.is_dir() {
            self.totals.file_count += 1;
            self.totals.total_size = self.totals.total_size.saturating_add(info.size);
            return Ok(());
        }

        let fs = self.fs;
        let listing = fs.list_dir(path, self.follow_symlinks);
        self.check_cancelled()?;
        match listing {
            Err(source) => {
                self.totals.unreadable_directory_count += 1;
                if is_root && self.single_root {
                    return Err(Abort::Failed {
                        path: path.to_path_buf(),
                        source,
                    });
                }
                debug!("unreadable directory {}: {source}", path.display());
            }
            Ok(children) => {
                self.totals.directory_count += 1;
                for child in children {
                    self.check_cancelled()?;
                    match child {
                        Ok(child) => {
                            let child_path = path.join(&child.name);
                            self.process(&child_path, Some(child.info), Some(toplevel))?;
                        }
                        Err(err) => {
                            debug!("skipping entry in {}: {err}", path.display());
                        }
                    }
                }
            }
        }

        self.check_cancelled()?;
        if self.throttle.ready(Instant::now()) {
            (self.on_progress)(&self.totals);
        }
        Ok(())
    }
}
