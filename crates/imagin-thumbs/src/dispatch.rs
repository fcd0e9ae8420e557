//! Delivery of completion callbacks to the caller's execution context
//!
//! The scheduler's worker never runs UI code itself when a [`MainThreadDispatcher`]
//! is installed: completions are posted to a [`MainThreadQueue`], which the UI
//! event loop drains on its own thread.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use tracing::debug;

/// A unit of work to run on the caller's context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Routes completion jobs to where callers expect them to run
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job);
}

/// Runs jobs immediately on the worker thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Posts jobs to a [`MainThreadQueue`]
#[derive(Debug, Clone)]
pub struct MainThreadDispatcher {
    sender: Sender<Job>,
}

impl Dispatcher for MainThreadDispatcher {
    fn dispatch(&self, job: Job) {
        if self.sender.send(job).is_err() {
            debug!("Main thread queue dropped, discarding completion");
        }
    }
}

/// Receiving end of a [`MainThreadDispatcher`], owned by the UI thread
pub struct MainThreadQueue {
    receiver: Receiver<Job>,
}

impl MainThreadQueue {
    /// Run every job that is ready right now; returns how many ran
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while let Ok(job) = self.receiver.try_recv() {
            job();
            count += 1;
        }
        count
    }

    /// Block until at least one job runs or `timeout` passes, then drain the rest
    pub fn run_for(&self, timeout: Duration) -> usize {
        match self.receiver.recv_timeout(timeout) {
            Ok(job) => {
                job();
                1 + self.run_pending()
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Keep running jobs until `count` have run or `timeout` passes
    pub fn run_until(&self, count: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut ran = 0;
        while ran < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.receiver.recv_timeout(remaining) {
                Ok(job) => {
                    job();
                    ran += 1;
                }
                Err(_) => break,
            }
        }
        ran
    }
}

/// Create a connected dispatcher/queue pair
pub fn main_thread_queue() -> (MainThreadDispatcher, MainThreadQueue) {
    let (sender, receiver) = mpsc::channel();
    (MainThreadDispatcher { sender }, MainThreadQueue { receiver })
}
