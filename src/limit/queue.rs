//! Bounded FIFO concurrency queue for LLM jobs.
//!
//! At most `max_concurrency` jobs run at once; at most `max_backlog` wait.
//! Submissions beyond the backlog are rejected immediately with
//! [`Error::QueueFull`]. `clear()` is a terminal drain used at shutdown:
//! waiting submitters are rejected with [`Error::QueueCleared`], running
//! jobs finish undisturbed.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{Error, Result};

pub struct RequestQueue {
    permits: Arc<Semaphore>,
    pending: AtomicUsize,
    max_concurrency: usize,
    max_backlog: usize,
}

/// Decrements the pending counter on every exit path, including
/// cancellation while waiting for a permit.
struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl RequestQueue {
    pub fn new(max_concurrency: usize, max_backlog: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            pending: AtomicUsize::new(0),
            max_concurrency: max_concurrency.max(1),
            max_backlog,
        }
    }

    /// Run `job` subject to the concurrency cap. FIFO across admitted jobs
    /// (the underlying semaphore is fair). Returns the job's output, or
    /// `QueueFull` / `QueueCleared` without running it.
    pub async fn submit<F, T>(&self, job: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        // Reserve a backlog slot or reject. compare_exchange keeps the
        // reservation atomic under concurrent submitters.
        let mut current = self.pending.load(Ordering::Acquire);
        loop {
            if current >= self.max_backlog {
                return Err(Error::QueueFull);
            }
            match self.pending.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        let guard = PendingGuard(&self.pending);

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return Err(Error::QueueCleared),
        };
        drop(guard);

        let output = job.await;
        drop(permit);
        Ok(output)
    }

    /// Terminal drain: reject all waiting submitters. Running jobs keep
    /// their permits and complete.
    pub fn clear(&self) {
        self.permits.close();
    }

    /// Jobs waiting for a permit right now.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Jobs currently running.
    pub fn running(&self) -> usize {
        self.max_concurrency - self.permits.available_permits().min(self.max_concurrency)
    }
}
