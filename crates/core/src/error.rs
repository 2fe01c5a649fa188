use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::models::CountSnapshot;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("a count job needs at least one root file")]
    EmptyRoots,

    #[error("the job has already been started")]
    AlreadyStarted,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Count(#[from] CountError),
}

/// Terminal failure of a count job.
#[derive(Debug, Error)]
pub enum CountError {
    /// The job was cancelled. `partial` holds whatever was counted before
    /// the cancellation was observed.
    #[error("count was cancelled")]
    Cancelled { partial: CountSnapshot },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CountError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CountError::Cancelled { .. })
    }
}
