//! Fixed-size worker pool
//!
//! Decouples the accept rate from the processing rate: the accept loop pushes
//! one task per connection and `workers` threads drain the queue. The pool
//! knows nothing about connections, only about boxed closures.

use crate::log::SharedLogger;
use std::any::Any;
use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pool errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] io::Error),

    #[error("Worker count must be at least 1")]
    NoWorkers,

    #[error("Thread pool is shut down")]
    ShutDown,
}

/// Unit of work executed by a worker
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    tasks: VecDeque<Task>,
    shutting_down: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    /// Signalled when a task is queued or shutdown starts
    available: Condvar,
    /// Signalled when a task is dequeued (backpressure)
    space: Condvar,
    capacity: Option<usize>,
    logger: SharedLogger,
}

impl Shared {
    // A panicking task never holds the lock, so poisoning carries no
    // broken invariant worth refusing service over.
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Thread pool with a shared FIFO queue
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Create a pool with an unbounded queue
    pub fn new(workers: usize, logger: SharedLogger) -> Result<Self> {
        Self::build(workers, None, logger)
    }

    /// Create a pool whose queue holds at most `capacity` pending tasks
    ///
    /// [`push`](ThreadPool::push) blocks while the queue is full.
    pub fn with_capacity(workers: usize, capacity: usize, logger: SharedLogger) -> Result<Self> {
        Self::build(workers, Some(capacity.max(1)), logger)
    }

    fn build(workers: usize, capacity: Option<usize>, logger: SharedLogger) -> Result<Self> {
        if workers == 0 {
            return Err(Error::NoWorkers);
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::with_capacity(capacity.unwrap_or(workers * 2)),
                shutting_down: false,
            }),
            available: Condvar::new(),
            space: Condvar::new(),
            capacity,
            logger,
        });

        let mut pool = ThreadPool {
            shared,
            workers: Vec::with_capacity(workers),
        };

        for id in 0..workers {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("h1serve-worker-{}", id))
                .spawn(move || worker_loop(&shared))?;
            pool.workers.push(handle);
        }

        Ok(pool)
    }

    /// Queue a task
    ///
    /// Returns immediately unless the pool was built with a capacity and the
    /// queue is full.
    pub fn push<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.lock();

        if let Some(capacity) = self.shared.capacity {
            while queue.tasks.len() >= capacity && !queue.shutting_down {
                queue = self
                    .shared
                    .space
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        if queue.shutting_down {
            return Err(Error::ShutDown);
        }

        queue.tasks.push_back(Box::new(task));
        drop(queue);

        self.shared.available.notify_one();
        Ok(())
    }

    /// Number of worker threads
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Number of queued tasks not yet picked up by a worker
    pub fn pending(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    /// Stop accepting tasks, run what is queued, and join every worker
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        {
            let mut queue = self.shared.lock();
            queue.shutting_down = true;
        }
        self.shared.available.notify_all();
        self.shared.space.notify_all();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                self.shared.logger.error("worker thread terminated abnormally");
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break task;
                }
                if queue.shutting_down {
                    return;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        shared.space.notify_one();

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            shared
                .logger
                .error(&format!("task panicked: {}", panic_message(&*payload)));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
