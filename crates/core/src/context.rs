//! The caller's execution context.
//!
//! Background workers never call observers directly. They post closures to a
//! [`ContextHandle`], and whichever thread owns the [`MainContext`] runs them
//! in the order they were posted when it iterates the context.

use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

type Invocation = Box<dyn FnOnce() + Send + 'static>;

const MAX_WAIT_SLICE: Duration = Duration::from_millis(50);

pub struct MainContext {
    sender: Sender<Invocation>,
    receiver: Receiver<Invocation>,
}

#[derive(Clone)]
pub struct ContextHandle {
    sender: Sender<Invocation>,
}

impl MainContext {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            sender: self.sender.clone(),
        }
    }

    /// Runs one queued closure. With `may_block` the call waits until one
    /// arrives. Returns whether anything ran.
    pub fn iteration(&self, may_block: bool) -> bool {
        let next = if may_block {
            self.receiver.recv().ok()
        } else {
            self.receiver.try_recv().ok()
        };
        match next {
            Some(invocation) => {
                invocation();
                true
            }
            None => false,
        }
    }

    /// Waits up to `timeout` for one closure and runs it.
    pub fn iteration_timeout(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(invocation) => {
                invocation();
                true
            }
            Err(_) => false,
        }
    }

    /// Runs everything already queued and returns how many closures ran.
    pub fn dispatch_pending(&self) -> usize {
        let mut dispatched = 0;
        while let Ok(invocation) = self.receiver.try_recv() {
            invocation();
            dispatched += 1;
        }
        dispatched
    }

    /// Iterates until `done` returns true or `deadline` passes. Returns the
    /// final value of `done`.
    pub fn run_until<F>(&self, deadline: Instant, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        loop {
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.iteration_timeout((deadline - now).min(MAX_WAIT_SLICE));
        }
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl Default for MainContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextHandle {
    /// Queues `f` to run on the context. Returns false when the context has
    /// been dropped, in which case `f` is discarded.
    pub fn invoke<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Box::new(f)).is_ok()
    }
}
