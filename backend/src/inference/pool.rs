//! Fixed-size pool of OS threads for blocking work.
//!
//! Jobs go through one FIFO channel; whichever idle worker grabs the receiver
//! next takes the oldest job. There is no cancellation: a job that was queued
//! runs even if nobody is waiting for its result any more.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Worker pool is shut down")]
    Closed,
}

#[derive(Debug, Default)]
struct PoolStats {
    active: AtomicUsize,
    queued: AtomicUsize,
}

/// Bounded pool of named worker threads.
pub struct WorkerPool {
    sender: mpsc::UnboundedSender<Job>,
    stats: Arc<PoolStats>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one) named `{name}-{index}`.
    pub fn new(name: &str, size: usize) -> Result<Self, PoolError> {
        let size = size.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let stats = Arc::new(PoolStats::default());

        for index in 0..size {
            let receiver = Arc::clone(&receiver);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || worker_loop(receiver, stats))?;
        }

        tracing::info!("Started {} {} worker(s)", size, name);

        Ok(Self {
            sender,
            stats,
            size,
        })
    }

    /// Queue `f` and return a handle to its result.
    ///
    /// If `f` panics the handle resolves to a `RecvError`; the worker survives.
    pub fn execute<F, T>(&self, f: F) -> Result<oneshot::Receiver<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let stats = Arc::clone(&self.stats);
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f));
            // Free the slot before answering, so a woken caller sees it idle.
            stats.active.fetch_sub(1, Ordering::SeqCst);
            match result {
                // Receiver may be gone; the work still counts as done.
                Ok(value) => {
                    let _ = tx.send(value);
                }
                Err(_) => tracing::error!(
                    worker = thread::current().name().unwrap_or("worker"),
                    "Job panicked"
                ),
            }
        });

        self.stats.queued.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(job).is_err() {
            self.stats.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(PoolError::Closed);
        }
        Ok(rx)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently running a job.
    pub fn active(&self) -> usize {
        self.stats.active.load(Ordering::SeqCst)
    }

    /// Jobs waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.stats.queued.load(Ordering::SeqCst)
    }
}

fn worker_loop(receiver: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>, stats: Arc<PoolStats>) {
    loop {
        let job = {
            let Ok(mut receiver) = receiver.lock() else {
                break;
            };
            receiver.blocking_recv()
        };
        // All senders dropped: the pool is gone.
        let Some(job) = job else {
            break;
        };

        stats.queued.fetch_sub(1, Ordering::SeqCst);
        // The job gives the slot back itself.
        stats.active.fetch_add(1, Ordering::SeqCst);
        job();
    }
}
