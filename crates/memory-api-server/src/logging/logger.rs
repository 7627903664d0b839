use flume::{bounded, Receiver, Sender};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::types::{ActivityLog, ActivityStatus};
use crate::config::ActivityConfig;

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Queue capacity (max logs in memory before dropping)
    pub queue_capacity: usize,

    /// Events drained per flush
    pub batch_size: usize,

    /// Max wait time before flushing batch (milliseconds)
    pub batch_timeout_ms: u64,

    pub worker_count: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            batch_timeout_ms: 1000,
            worker_count: 1,
        }
    }
}

impl From<&ActivityConfig> for LoggerConfig {
    fn from(cfg: &ActivityConfig) -> Self {
        Self {
            queue_capacity: cfg.queue_capacity.max(1),
            batch_size: cfg.batch_size.max(1),
            batch_timeout_ms: cfg.batch_timeout_ms.max(1),
            worker_count: cfg.worker_count.max(1),
        }
    }
}

/// Async activity logger with queue mechanism.
/// Must be constructed inside a tokio runtime.
#[derive(Clone)]
pub struct ActivityLogger {
    sender: Sender<ActivityLog>,
}

impl ActivityLogger {
    /// Initialize logger with background workers
    pub fn new(config: LoggerConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity);

        info!(
            "Initializing ActivityLogger: queue={}, batch={}, timeout={}ms, workers={}",
            config.queue_capacity, config.batch_size, config.batch_timeout_ms, config.worker_count
        );

        for worker_id in 0..config.worker_count {
            let receiver = receiver.clone();
            let config = config.clone();

            tokio::spawn(async move {
                Self::worker_loop(worker_id, receiver, config).await;
            });
        }

        Self { sender }
    }

    /// Log activity (non-blocking, fire-and-forget)
    pub fn log(&self, activity: ActivityLog) {
        if let Err(e) = self.sender.try_send(activity) {
            warn!("Failed to enqueue activity log (queue full?): {}", e);
        }
    }

    async fn worker_loop(worker_id: usize, receiver: Receiver<ActivityLog>, config: LoggerConfig) {
        debug!("Activity worker {} started", worker_id);

        let mut batch: Vec<ActivityLog> = Vec::with_capacity(config.batch_size);
        let batch_timeout = Duration::from_millis(config.batch_timeout_ms);

        loop {
            let deadline = tokio::time::Instant::now() + batch_timeout;

            while batch.len() < config.batch_size {
                match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                    Ok(Ok(log)) => batch.push(log),
                    Ok(Err(_)) => {
                        // Channel closed, flush and exit
                        Self::flush_batch(&batch, worker_id);
                        debug!("Activity worker {} shutting down (channel closed)", worker_id);
                        return;
                    }
                    Err(_) => break,
                }
            }

            if !batch.is_empty() {
                Self::flush_batch(&batch, worker_id);
                batch.clear();
            } else {
                sleep(Duration::from_millis(100)).await;
            }
        }
    }

    fn flush_batch(batch: &[ActivityLog], worker_id: usize) {
        for log in batch {
            let payload = serde_json::to_string(log).unwrap_or_default();
            match log.activity_status {
                ActivityStatus::Error => error!(
                    target: "activity",
                    worker_id,
                    kind = log.activity_type.as_str(),
                    identity = %log.identity_key,
                    "{}",
                    payload
                ),
                ActivityStatus::Warning => warn!(
                    target: "activity",
                    worker_id,
                    kind = log.activity_type.as_str(),
                    identity = %log.identity_key,
                    "{}",
                    payload
                ),
                ActivityStatus::Success | ActivityStatus::Info => info!(
                    target: "activity",
                    worker_id,
                    kind = log.activity_type.as_str(),
                    identity = %log.identity_key,
                    "{}",
                    payload
                ),
            }
        }
    }

    /// Get queue statistics (for monitoring)
    pub fn queue_len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_queue_full(&self) -> bool {
        self.sender.is_full()
    }
}

impl Default for ActivityLogger {
    fn default() -> Self {
        Self::new(LoggerConfig::default())
    }
}
