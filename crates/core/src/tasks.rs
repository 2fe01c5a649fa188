use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::warn;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::context::ContextHandle;
use crate::error::Result;
use crate::listing::{list_directory, DirectoryEntry};

const DEFAULT_IDLE_THREADS: usize = 2;

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Scheduling lane for background work.
///
/// `Default` is for work a user is waiting on, such as listing a folder.
/// `Idle` work (deep counts) runs on its own pool so it can never occupy the
/// threads interactive work needs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Priority {
    #[default]
    Default,
    Idle,
}

pub struct TaskRunner {
    default_pool: ThreadPool,
    idle_pool: ThreadPool,
}

impl TaskRunner {
    pub fn new() -> Result<Self> {
        Self::with_threads(0, DEFAULT_IDLE_THREADS)
    }

    /// `default_threads == 0` lets rayon size the interactive pool from the
    /// number of CPUs. The idle pool always gets at least one thread.
    pub fn with_threads(default_threads: usize, idle_threads: usize) -> Result<Self> {
        let default_pool = ThreadPoolBuilder::new()
            .num_threads(default_threads)
            .thread_name(|i| format!("deepcount-worker-{i}"))
            .build()?;
        let idle_pool = ThreadPoolBuilder::new()
            .num_threads(idle_threads.max(1))
            .thread_name(|i| format!("deepcount-idle-{i}"))
            .build()?;
        Ok(Self {
            default_pool,
            idle_pool,
        })
    }

    fn pool(&self, priority: Priority) -> &ThreadPool {
        match priority {
            Priority::Default => &self.default_pool,
            Priority::Idle => &self.idle_pool,
        }
    }

    /// Runs `work` on a worker thread of the `priority` lane, then hands its
    /// output to `on_done` on `context`.
    pub fn submit<T, W, D>(
        &self,
        priority: Priority,
        cancel: CancelToken,
        context: &ContextHandle,
        work: W,
        on_done: D,
    ) -> TaskHandle
    where
        T: Send + 'static,
        W: FnOnce(&CancelToken) -> T + Send + 'static,
        D: FnOnce(T) + Send + 'static,
    {
        let finished = Arc::new(AtomicBool::new(false));
        let handle = TaskHandle {
            cancel: cancel.clone(),
            finished: finished.clone(),
        };
        let context = context.clone();

        self.pool(priority).spawn(move || {
            let output = work(&cancel);
            let delivered = context.invoke(move || {
                finished.store(true, Ordering::SeqCst);
                on_done(output);
            });
            if !delivered {
                warn!("background task finished after its context went away; result dropped");
            }
        });

        handle
    }

    /// Lists one directory on the interactive lane.
    pub fn list_directory<D>(
        &self,
        dir: impl Into<PathBuf>,
        cancel: CancelToken,
        context: &ContextHandle,
        on_done: D,
    ) -> TaskHandle
    where
        D: FnOnce(Result<Vec<DirectoryEntry>>) + Send + 'static,
    {
        let dir = dir.into();
        self.submit(
            Priority::Default,
            cancel,
            context,
            move |cancel| list_directory(&dir, cancel),
            on_done,
        )
    }
}

#[derive(Clone, Debug)]
pub struct TaskHandle {
    cancel: CancelToken,
    finished: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// True once the result has been handed to the completion callback.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}
