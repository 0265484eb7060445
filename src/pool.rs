//! A bounded pool of workers whose results are drained from a completion queue.
//!
//! Results arrive in completion order, not submission order. Every task yields a
//! [TaskOutcome] carrying either its value or the reason it failed; a panicking task is
//! reported as a failure instead of taking the pool down.

#[cfg(feature = "rayon")]
extern crate rayon;

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Result of one task, tagged with the id it was submitted under.
#[derive(Debug)]
pub struct TaskOutcome<T> {
    pub id: usize,
    pub result: Result<T>,
}

pub struct TaskPool<T> {
    #[cfg(feature = "rayon")]
    pool: rayon::ThreadPool,
    workers: usize,
    pending: usize,
    tx: Sender<TaskOutcome<T>>,
    rx: Receiver<TaskOutcome<T>>,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<T: Send + 'static> TaskPool<T> {
    /// Builds a pool with `workers` threads.
    ///
    /// Without the `rayon` feature, tasks run to completion on the calling thread as soon as
    /// they are submitted.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::WorkerPool("at least one worker is required".to_string()));
        }

        #[cfg(feature = "rayon")]
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("adspot-worker-{}", i))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        let (tx, rx) = mpsc::channel();

        Ok(Self {
            #[cfg(feature = "rayon")]
            pool,
            workers,
            pending: 0,
            tx,
            rx,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of submitted tasks whose outcome has not been drained yet.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Returns true if every worker has an outstanding task.
    pub fn is_full(&self) -> bool {
        self.pending >= self.workers
    }

    pub fn submit<F>(&mut self, id: usize, task: F)
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let tx = self.tx.clone();
        let job = move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(result) => result,
                Err(payload) => Err(Error::WorkerPool(format!(
                    "task panicked: {}",
                    panic_message(payload)
                ))),
            };
            // The receiver is only gone if the caller gave up on the batch.
            let _ = tx.send(TaskOutcome { id, result });
        };

        self.pending += 1;

        #[cfg(feature = "rayon")]
        self.pool.spawn(job);
        #[cfg(not(feature = "rayon"))]
        job();
    }

    /// Waits for the next task to finish.
    ///
    /// The queue is polled every `poll_interval`; an expired poll is retried, not treated as
    /// a failure. If `timeout` is set and no task finishes within it, a
    /// [Error::WorkerTimeout] is returned. Returns `None` once nothing is pending.
    pub fn next_completed(
        &mut self,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<Option<TaskOutcome<T>>> {
        if self.pending == 0 {
            return Ok(None);
        }

        let started = Instant::now();
        loop {
            match self.rx.recv_timeout(poll_interval) {
                Ok(outcome) => {
                    self.pending -= 1;
                    return Ok(Some(outcome));
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(timeout) = timeout {
                        if started.elapsed() >= timeout {
                            return Err(Error::WorkerTimeout(self.pending));
                        }
                    }
                    tracing::trace!(pending = self.pending, "still waiting on workers");
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::WorkerPool(
                        "completion queue disconnected".to_string(),
                    ));
                }
            }
        }
    }
}
