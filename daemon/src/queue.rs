use std::sync::Arc;
use tokio::sync::mpsc;

use common::JobId;

use crate::metrics::WorkerMetrics;

/// One unit of queued work: a request to execute the referenced job once.
/// Delivery is at-least-once from the consumer's point of view; a duplicate
/// item simply produces a fresh run.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub job_id: JobId,
}

/// Producer half of the work queue. The dispatcher is the sole consumer.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    metrics: Arc<WorkerMetrics>,
}

pub struct JobQueueReceiver {
    rx: mpsc::UnboundedReceiver<QueueItem>,
    metrics: Arc<WorkerMetrics>,
}

impl JobQueue {
    pub fn new(metrics: Arc<WorkerMetrics>) -> (JobQueue, JobQueueReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            JobQueue {
                tx,
                metrics: metrics.clone(),
            },
            JobQueueReceiver { rx, metrics },
        )
    }

    /// Fails only when the dispatcher side has shut down.
    pub fn enqueue(&self, item: QueueItem) -> Result<(), QueueClosed> {
        self.tx.send(item).map_err(|_| QueueClosed)?;
        self.metrics.incr_queue_depth();
        Ok(())
    }
}

impl JobQueueReceiver {
    /// Returns `None` once every producer handle is dropped.
    pub async fn recv(&mut self) -> Option<QueueItem> {
        let item = self.rx.recv().await?;
        self.metrics.decr_queue_depth();
        Some(item)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("job queue is closed")]
pub struct QueueClosed;
