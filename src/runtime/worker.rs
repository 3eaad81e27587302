//! Fixed-size worker thread pool.
//!
//! Jobs are executed in FIFO order by whichever worker is free. A panicking
//! job is caught and logged; the worker keeps serving the queue.

use crate::config::ShutdownPolicy;
use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The pool no longer accepts work.
#[derive(Debug, Error)]
#[error("worker pool is shut down")]
pub struct SubmitError;

struct Queue {
    jobs: VecDeque<Job>,
    closed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    policy: ShutdownPolicy,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn new(size: usize, policy: ShutdownPolicy) -> io::Result<Self> {
        let size = size.max(1);
        let mut pool = Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    jobs: VecDeque::new(),
                    closed: false,
                }),
                available: Condvar::new(),
            }),
            handles: Vec::with_capacity(size),
            policy,
        };

        for worker_id in 0..size {
            let shared = Arc::clone(&pool.shared);
            // On failure the partially built pool is dropped, which joins
            // the workers spawned so far.
            let handle = thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, shared))?;
            pool.handles.push(handle);
        }

        info!(workers = size, policy = ?policy, "Worker pool started");
        Ok(pool)
    }

    /// Queue a job for execution.
    pub fn submit(&self, job: Job) -> Result<(), SubmitError> {
        let mut queue = self.lock();
        if queue.closed {
            return Err(SubmitError);
        }
        queue.jobs.push_back(job);
        drop(queue);
        self.shared.available.notify_one();
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Jobs waiting for a worker.
    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.lock().jobs.len()
    }

    /// Stop accepting work and join every worker.
    ///
    /// With `Drain`, queued jobs run before the workers exit; with `Discard`
    /// they are dropped. Returns the number of discarded jobs. Calling it
    /// again is a no-op.
    pub fn shutdown(&mut self) -> usize {
        let discarded = {
            let mut queue = self.lock();
            if queue.closed && self.handles.is_empty() {
                return 0;
            }
            queue.closed = true;
            match self.policy {
                ShutdownPolicy::Drain => 0,
                ShutdownPolicy::Discard => {
                    let n = queue.jobs.len();
                    queue.jobs.clear();
                    n
                }
            }
        };
        self.shared.available.notify_all();

        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }

        if discarded > 0 {
            info!(discarded, "Discarded queued jobs at shutdown");
        }
        debug!("Worker pool stopped");
        discarded
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(worker_id: usize, shared: Arc<Shared>) {
    debug!(worker = worker_id, "Worker started");
    loop {
        let job = {
            let mut queue = shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break Some(job);
                }
                if queue.closed {
                    break None;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let Some(job) = job else { break };
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(worker = worker_id, "Job panicked");
        }
    }
    debug!(worker = worker_id, "Worker stopped");
}
