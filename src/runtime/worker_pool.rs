//! Fixed-size worker pool.
//!
//! The pool drives both the executor's bookkeeping and the operations' own
//! work. It supports:
//!
//! - **FIFO injection**: one lock-free `SegQueue` shared by all workers
//! - **Re-entrancy**: tasks may submit further tasks from worker threads
//! - **Panic isolation**: a panicking task is logged and the worker survives
//! - **Shutdown**: graceful shutdown with bounded drain timeout
//!
//! # Example
//!
//! ```ignore
//! use thunkrt::runtime::{ExecutorConfig, TaskRunner, WorkerPool};
//!
//! let pool = WorkerPool::new(&ExecutorConfig::default().worker_threads(4))?;
//! pool.run(Box::new(|| println!("hello from a worker")));
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, ErrorKind};
use crate::runtime::config::ExecutorConfig;
use crate::runtime::task_runner::{Task, TaskRunner};
use crate::tracing_compat::{debug, error, warn};

/// Errors surfaced by pool construction and submission.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread {name}")]
    Spawn {
        /// Name of the thread that failed to start.
        name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// The pool no longer accepts work.
    #[error("worker pool is shut down")]
    Shutdown,
}

impl From<PoolError> for Error {
    fn from(e: PoolError) -> Self {
        let kind = match e {
            PoolError::Spawn { .. } => ErrorKind::ResourceExhausted,
            PoolError::Shutdown => ErrorKind::Unavailable,
        };
        let msg = e.to_string();
        Self::new(kind).with_message(msg).with_source(e)
    }
}

struct PoolInner {
    queue: SegQueue<Task>,
    shutdown: AtomicBool,
    pending: AtomicUsize,
    busy: AtomicUsize,
    completed: AtomicUsize,
    mutex: Mutex<()>,
    condvar: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
    thread_count: usize,
}

impl PoolInner {
    fn notify_one(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_one();
    }

    fn notify_all(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// A fixed set of threads draining a shared FIFO queue.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawns `config.worker_threads` workers.
    pub fn new(config: &ExecutorConfig) -> Result<Self, PoolError> {
        let mut config = config.clone();
        config.normalize();
        let inner = Arc::new(PoolInner {
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            handles: Mutex::new(Vec::with_capacity(config.worker_threads)),
            thread_count: config.worker_threads,
        });
        let pool = Self {
            inner,
            shutdown_timeout: config.shutdown_timeout,
        };

        for id in 0..config.worker_threads {
            let name = format!("{}-{id}", config.thread_name_prefix);
            let worker = Arc::clone(&pool.inner);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&worker))
                .map_err(|source| PoolError::Spawn { name, source })?;
            pool.inner.handles.lock().push(handle);
        }
        debug!(threads = config.worker_threads, "worker pool started");
        Ok(pool)
    }

    /// Queues `task`; fails once the pool is shut down.
    pub fn submit(&self, task: Task) -> Result<(), PoolError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::Shutdown);
        }
        self.inner.pending.fetch_add(1, Ordering::Relaxed);
        self.inner.queue.push(task);
        self.inner.notify_one();
        Ok(())
    }

    /// Number of worker threads.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.inner.thread_count
    }

    /// Tasks queued but not yet started.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.load(Ordering::Relaxed)
    }

    /// Tasks that have finished running.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Returns `true` if the pool is shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stops accepting work. Already queued tasks still run.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.notify_all();
    }

    /// Shuts down and waits for workers to drain the queue and exit.
    ///
    /// Returns `false` if `timeout` elapsed first. A worker calling this on
    /// its own pool is not waited for.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        let deadline = Instant::now() + timeout;
        let me = thread::current().id();
        let handles = std::mem::take(&mut *self.inner.handles.lock());
        let mut clean = true;
        for handle in handles {
            if handle.thread().id() == me {
                continue;
            }
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    clean = false;
                    break;
                }
                self.inner.notify_all();
                thread::sleep(Duration::from_millis(1));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
        if !clean {
            warn!(
                pending = self.pending_count(),
                "worker pool did not drain before timeout"
            );
        }
        clean
    }
}

impl TaskRunner for WorkerPool {
    fn run(&self, task: Task) {
        // A rejected task is dropped here; any promise it owned resolves to
        // `Unavailable`.
        if let Err(e) = self.submit(task) {
            debug!(error = %e, "task rejected");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let _ = self.shutdown_and_wait(self.shutdown_timeout);
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.inner.thread_count)
            .field("pending", &self.inner.pending.load(Ordering::Relaxed))
            .field("busy", &self.inner.busy.load(Ordering::Relaxed))
            .field("shutdown", &self.inner.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(task) = inner.queue.pop() {
            inner.pending.fetch_sub(1, Ordering::Relaxed);
            inner.busy.fetch_add(1, Ordering::Relaxed);
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                error!("task panicked on worker thread");
            }
            inner.busy.fetch_sub(1, Ordering::Relaxed);
            inner.completed.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        // Re-check under the lock: submitters push before notifying under
        // the same lock, so a wakeup cannot slip between the check and wait.
        let mut guard = inner.mutex.lock();
        if !inner.queue.is_empty() {
            continue;
        }
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        inner.condvar.wait(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::promise;

    fn pool(threads: usize) -> WorkerPool {
        WorkerPool::new(&ExecutorConfig::default().worker_threads(threads)).expect("pool")
    }

    #[test]
    fn runs_submitted_tasks() {
        let pool = pool(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let mut events = Vec::new();
        for _ in 0..64 {
            let (p, v) = promise::<()>();
            let c = Arc::clone(&counter);
            pool.run(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
                p.set(());
            }));
            events.push(v);
        }
        for v in &events {
            v.wait().expect("task");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn reentrant_submission() {
        let pool = Arc::new(pool(1));
        let (p, v) = promise::<u32>();
        let inner_pool = Arc::clone(&pool);
        pool.run(Box::new(move || {
            inner_pool.run(Box::new(move || p.set(5)));
        }));
        assert_eq!(*v.wait().expect("nested"), 5);
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = pool(1);
        pool.run(Box::new(|| panic!("boom")));
        let (p, v) = promise::<()>();
        pool.run(Box::new(move || p.set(())));
        assert!(v.wait_timeout(Duration::from_secs(5)).is_some());
    }

    #[test]
    fn rejected_task_resolves_unavailable() {
        let pool = pool(1);
        assert!(pool.shutdown_and_wait(Duration::from_secs(5)));
        let (p, v) = promise::<()>();
        pool.run(Box::new(move || p.set(())));
        assert_eq!(v.error().map(Error::kind), Some(ErrorKind::Unavailable));
        assert!(matches!(
            pool.submit(Box::new(|| {})),
            Err(PoolError::Shutdown)
        ));
    }
}
