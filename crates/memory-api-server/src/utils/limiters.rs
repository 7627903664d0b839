use anyhow::Result;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Global ceilings for detached background work
#[derive(Clone)]
pub struct Limiters {
    pub refresh: Arc<Semaphore>,
    pub durable_append: Arc<Semaphore>,
    pub acquire_timeout: Duration,
}

impl Limiters {
    pub fn new(cfg: &crate::config::MemoryConfig) -> Self {
        Self {
            refresh: Arc::new(Semaphore::new(cfg.max_concurrent_refreshes.max(1))),
            durable_append: Arc::new(Semaphore::new(cfg.max_concurrent_appends.max(1))),
            acquire_timeout: Duration::from_secs(cfg.refresh_timeout_seconds.max(1)),
        }
    }

    /// Non-waiting acquisition; None when the ceiling is reached
    pub fn try_refresh_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.refresh.clone().try_acquire_owned().ok()
    }

    pub async fn acquire_timed(
        sem: Arc<Semaphore>,
        acquire_timeout: Duration,
        op: &'static str,
    ) -> Result<(OwnedSemaphorePermit, Duration)> {
        let start = Instant::now();

        let permit = tokio::time::timeout(acquire_timeout, sem.acquire_owned())
            .await
            .map_err(|_| anyhow::anyhow!("Limiter acquire timeout for op={}", op))??;

        Ok((permit, start.elapsed()))
    }
}
