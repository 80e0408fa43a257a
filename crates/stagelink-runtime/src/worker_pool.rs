//! Bounded pool for blocking hardware and encode calls.
//!
//! Every driver call may park its OS thread for tens of milliseconds (serial
//! I/O, capture, compression).  They run on tokio's blocking threads, with a
//! semaphore limiting how many are in flight at once so a burst of commands
//! cannot starve frame capture of threads.

use std::sync::Arc;

use stagelink_types::LinkError;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// `size` is raised to 1 if zero.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `f` on a blocking thread once a worker is free.
    ///
    /// The permit travels with the closure, so it is released only when the
    /// call actually returns even if the awaiting task is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Worker`] if the pool is closed or `f` panicked.
    pub async fn run<F, T>(&self, f: F) -> Result<T, LinkError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| LinkError::Worker("worker pool closed".to_string()))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| LinkError::Worker(format!("blocking call failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn returns_closure_value() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.run(|| 21 * 2).await.unwrap(), 42);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn zero_size_means_one_worker() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }

    #[tokio::test]
    async fn panics_surface_as_worker_errors() {
        let pool = WorkerPool::new(1);
        let result: Result<(), LinkError> = pool.run(|| panic!("driver blew up")).await;
        assert!(matches!(result, Err(LinkError::Worker(_))));
        // Permit released despite the panic.
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrency_is_bounded_by_size() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
