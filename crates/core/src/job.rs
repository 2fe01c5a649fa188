use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};

use crate::context::ContextHandle;
use crate::count::count_roots;
use crate::error::{CountError, Error, Result};
use crate::fs::{FileSystem, LocalFileSystem};
use crate::models::{CountOptions, CountSnapshot, JobState};
use crate::tasks::{CancelToken, TaskHandle, TaskRunner};

type ProgressCallback = Arc<dyn Fn(&CountSnapshot) + Send + Sync>;

/// Background job computing the deep size of a set of files and folders.
///
/// Progress and the final result are delivered on the [`ContextHandle`]
/// passed to [`DeepCountJob::run`], never on the worker thread.
pub struct DeepCountJob {
    roots: Arc<[PathBuf]>,
    options: CountOptions,
    fs: Arc<dyn FileSystem>,
    cancel: CancelToken,
    state: Arc<Mutex<JobState>>,
    on_progress: Option<ProgressCallback>,
}

impl DeepCountJob {
    pub fn new(roots: Vec<PathBuf>, options: CountOptions) -> Result<Self> {
        if roots.is_empty() {
            return Err(Error::EmptyRoots);
        }
        Ok(Self {
            roots: roots.into(),
            options,
            fs: Arc::new(LocalFileSystem),
            cancel: CancelToken::new(),
            state: Arc::new(Mutex::new(JobState::Created)),
            on_progress: None,
        })
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn on_progress<F>(&mut self, callback: F)
    where
        F: Fn(&CountSnapshot) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn options(&self) -> &CountOptions {
        &self.options
    }

    pub fn state(&self) -> JobState {
        *lock(&self.state)
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Safe from any thread, any number of times. Once the worker is done
    /// but before the result reaches the context, the result is turned into
    /// a cancellation carrying the final counters and queued snapshots are
    /// dropped. Has no effect once `on_done` has run.
    pub fn cancel(&self) {
        if !self.state().is_terminal() {
            debug!("cancelling deep count of {} root(s)", self.roots.len());
        }
        self.cancel.cancel();
    }

    /// Starts counting on the runner's lane for `options.priority` and
    /// returns immediately. `on_done` runs once on `context` with the final
    /// counters or the reason the job stopped.
    pub fn run<D>(
        &self,
        runner: &TaskRunner,
        context: &ContextHandle,
        on_done: D,
    ) -> Result<TaskHandle>
    where
        D: FnOnce(std::result::Result<CountSnapshot, CountError>) + Send + 'static,
    {
        {
            let mut state = lock(&self.state);
            if *state != JobState::Created {
                return Err(Error::AlreadyStarted);
            }
            *state = JobState::Running;
        }

        info!("starting deep count of {} root(s)", self.roots.len());

        let roots = self.roots.clone();
        let options = self.options.clone();
        let fs = self.fs.clone();
        let progress_context = context.clone();
        let on_progress = self.on_progress.clone();
        let state = self.state.clone();
        let done_cancel = self.cancel.clone();

        let handle = runner.submit(
            self.options.priority,
            self.cancel.clone(),
            context,
            move |cancel| {
                count_roots(fs.as_ref(), &roots, &options, cancel, |snapshot| {
                    let Some(callback) = on_progress.as_ref() else {
                        return;
                    };
                    let callback = callback.clone();
                    let cancel = cancel.clone();
                    let snapshot = *snapshot;
                    progress_context.invoke(move || {
                        if !cancel.is_cancelled() {
                            callback(&snapshot);
                        }
                    });
                })
            },
            move |outcome| {
                // Snapshots still queued are dropped once cancelled.
                let outcome = match outcome {
                    Ok(totals) if done_cancel.is_cancelled() => {
                        Err(CountError::Cancelled { partial: totals })
                    }
                    outcome => outcome,
                };
                let terminal = match &outcome {
                    Ok(totals) => {
                        info!(
                            "deep count finished: {} files, {} folders, {} bytes",
                            totals.file_count, totals.directory_count, totals.total_size
                        );
                        JobState::Succeeded
                    }
                    Err(CountError::Cancelled { .. }) => {
                        info!("deep count cancelled");
                        JobState::Cancelled
                    }
                    Err(err) => {
                        info!("deep count failed: {err}");
                        JobState::Failed
                    }
                };
                *lock(&state) = terminal;
                on_done(outcome);
            },
        );

        Ok(handle)
    }
}

fn lock(state: &Mutex<JobState>) -> MutexGuard<'_, JobState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
