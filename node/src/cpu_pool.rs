use evg_core::errors::ChainError;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Bounded offload pool for CPU-heavy work (script evaluation, aggregate
/// signature checks, weight-proof verification). Network and timer tasks
/// stay on the cooperative runtime; only jobs holding a permit occupy a
/// blocking thread, and `reserved_cores` are kept free for the rest of the
/// process.
#[derive(Clone)]
pub struct CpuPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl CpuPool {
    pub fn new(reserved_cores: usize) -> Self {
        let available = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(2);
        let size = available.saturating_sub(reserved_cores).max(1);
        CpuPool {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `job` on a blocking thread once a permit is free. Cancelling
    /// the returned future before the job is scheduled releases the permit
    /// without running it.
    pub async fn run<T, F>(&self, job: F) -> Result<T, ChainError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ChainError::Shutdown)?;
        let result = tokio::task::spawn_blocking(move || {
            let result = job();
            drop(permit);
            result
        })
        .await
        .unwrap_or_else(|e| panic!("worker pool job panicked: {e}"));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_jobs() {
        let pool = CpuPool::new(0);
        let result = pool.run(|| 21 * 2).await.unwrap();
        assert_eq!(result, 42);
        assert!(pool.size() >= 1);
    }

    #[tokio::test]
    async fn test_reserved_cores_shrink_pool() {
        let all = CpuPool::new(0);
        let reserved = CpuPool::new(usize::MAX);
        assert!(reserved.size() <= all.size());
        assert_eq!(reserved.size(), 1);
    }
}
