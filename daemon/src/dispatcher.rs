use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use common::RunStatus;

use crate::db::Db;
use crate::limiter::DomainLimiter;
use crate::metrics::WorkerMetrics;
use crate::orchestrator::BotOrchestrator;
use crate::queue::{JobQueueReceiver, QueueItem};

/// Sole consumer of the work queue. Turns each item into one governed
/// execution: run creation, host slot acquisition, orchestration, and the
/// terminal state write.
pub struct Dispatcher {
    db: Arc<Mutex<Db>>,
    limiter: Arc<DomainLimiter>,
    orchestrator: Arc<BotOrchestrator>,
    metrics: Arc<WorkerMetrics>,
    worker_concurrency: usize,
}

impl Dispatcher {
    pub fn new(
        db: Arc<Mutex<Db>>,
        limiter: Arc<DomainLimiter>,
        orchestrator: Arc<BotOrchestrator>,
        metrics: Arc<WorkerMetrics>,
        worker_concurrency: usize,
    ) -> Self {
        Self {
            db,
            limiter,
            orchestrator,
            metrics,
            worker_concurrency: worker_concurrency.max(1),
        }
    }

    /// Spawns the fixed-size worker pool. Workers share one receiver, so at
    /// most `worker_concurrency` items are in flight at a time; they exit
    /// when every queue producer is gone.
    pub fn spawn(self: &Arc<Self>, rx: JobQueueReceiver) -> Vec<JoinHandle<()>> {
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        (0..self.worker_concurrency)
            .map(|worker| {
                let dispatcher = self.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        let item = { rx.lock().await.recv().await };
                        match item {
                            Some(item) => dispatcher.process_item(item).await,
                            None => break,
                        }
                    }
                    log::debug!("Worker {} stopped", worker);
                })
            })
            .collect()
    }

    /// One queue item, end to end. Never returns an error: every outcome is
    /// absorbed into run state or the log so a bad item cannot take a
    /// worker down.
    pub async fn process_item(&self, item: QueueItem) {
        let job = match self.db.lock().unwrap().get_job(&item.job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                // At-least-once delivery: a missing job is dropped without
                // a run; any retry policy lives with the producer.
                log::warn!("Job not found, dropping queue item: {}", item.job_id);
                return;
            }
            Err(e) => {
                log::error!("Failed to load job {}: {}", item.job_id, e);
                return;
            }
        };

        let run = match self.db.lock().unwrap().create_run(&job.id) {
            Ok(run) => run,
            Err(e) => {
                log::error!("Failed to create run for job {}: {}", job.id, e);
                return;
            }
        };
        log::info!("Run {} started for job {} ({})", run.id, job.id, job.url);

        let host = DomainLimiter::host_of(&job.url);
        self.limiter.acquire(&host).await;

        let mut rng = StdRng::from_entropy();
        let report = self.orchestrator.run_job(&job, &run.id, &mut rng).await;

        // Paired with acquire above on every path; run_job never fails.
        self.limiter.release(&host);

        let status = if report.ok { RunStatus::Success } else { RunStatus::Failed };
        let write = self.db.lock().unwrap().finish_run(
            &run.id,
            status,
            &report.logs,
            report.error.as_deref(),
            report.screenshot.as_deref(),
        );
        if let Err(e) = write {
            log::error!("Failed to persist run {} outcome: {}", run.id, e);
        }

        if report.ok {
            self.metrics.record_success();
            log::info!("Run {} finished: SUCCESS", run.id);
        } else {
            self.metrics.record_failure();
            log::info!(
                "Run {} finished: FAILED ({})",
                run.id,
                report.error.as_deref().unwrap_or("unknown")
            );
        }
        log::info!(target: "run_output", "Run {} ({})\n{}", run.id, job.id, report.logs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::scripted::{ScriptedDriver, SessionScript};
    use crate::executor::StepExecutor;
    use crate::queue::JobQueue;
    use common::{Job, JobId, Step};
    use std::collections::HashSet;
    use std::time::Duration;

    fn harness(
        script: SessionScript,
        per_domain: u32,
        workers: usize,
    ) -> (Arc<Dispatcher>, Arc<ScriptedDriver>, Arc<Mutex<Db>>, Arc<WorkerMetrics>, tempfile::TempDir) {
        let driver = Arc::new(ScriptedDriver::new(script));
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Mutex::new(Db::in_memory().unwrap()));
        let metrics = Arc::new(WorkerMetrics::new());
        let executor = StepExecutor::new(driver.clone(), dir.path().to_path_buf());
        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            Arc::new(DomainLimiter::new(per_domain)),
            Arc::new(BotOrchestrator::new(executor)),
            metrics.clone(),
            workers,
        ));
        (dispatcher, driver, db, metrics, dir)
    }

    fn stored_job(db: &Arc<Mutex<Db>>, id: &str, steps: Vec<Step>) -> JobId {
        let job = Job {
            id: JobId(id.to_string()),
            url: "https://example.com/contact".to_string(),
            steps,
            config: None,
        };
        db.lock().unwrap().add_job(&job).unwrap();
        job.id
    }

    #[tokio::test(start_paused = true)]
    async fn missing_job_creates_no_run() {
        let (dispatcher, _driver, db, metrics, _dir) = harness(SessionScript::default(), 2, 1);
        let ghost = JobId("ghost".to_string());

        dispatcher.process_item(QueueItem { job_id: ghost.clone() }).await;

        assert!(db.lock().unwrap().list_runs(&ghost).unwrap().is_empty());
        assert_eq!(metrics.success_count(), 0);
        assert_eq!(metrics.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_item_persists_success_and_counts() {
        let (dispatcher, _driver, db, metrics, _dir) = harness(SessionScript::default(), 2, 1);
        let job_id = stored_job(&db, "j1", vec![Step::Pause]);

        dispatcher.process_item(QueueItem { job_id: job_id.clone() }).await;

        let runs = db.lock().unwrap().list_runs(&job_id).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Success);
        assert!(runs[0].logs.contains("Navigated to https://example.com/contact"));
        assert!(runs[0].finished_at.is_some());
        assert_eq!(metrics.success_count(), 1);
        assert_eq!(metrics.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_item_persists_error_and_screenshot() {
        let script = SessionScript {
            never_appears: HashSet::from(["#success".to_string()]),
            ..Default::default()
        };
        let (dispatcher, _driver, db, metrics, _dir) = harness(script, 2, 1);
        let job_id = stored_job(
            &db,
            "j1",
            vec![Step::Wait {
                selector: Some("#success".to_string()),
                timeout_ms: Some(1000),
            }],
        );

        dispatcher.process_item(QueueItem { job_id: job_id.clone() }).await;

        let runs = db.lock().unwrap().list_runs(&job_id).unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].error.as_deref().unwrap().contains("#success"));
        assert!(runs[0].screenshot.as_deref().unwrap().starts_with("/results/"));
        assert_eq!(metrics.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_delivery_creates_a_fresh_run_each_time() {
        let (dispatcher, _driver, db, metrics, _dir) = harness(SessionScript::default(), 2, 1);
        let job_id = stored_job(&db, "j1", vec![Step::Pause]);

        dispatcher.process_item(QueueItem { job_id: job_id.clone() }).await;
        dispatcher.process_item(QueueItem { job_id: job_id.clone() }).await;

        assert_eq!(db.lock().unwrap().list_runs(&job_id).unwrap().len(), 2);
        assert_eq!(metrics.success_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn per_host_limit_serializes_same_host_items() {
        let script = SessionScript {
            hold: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        // Two free workers, but one host slot: executions must not overlap.
        let (dispatcher, driver, db, metrics, _dir) = harness(script, 1, 2);
        let job_a = stored_job(&db, "a", vec![Step::Pause]);
        let job_b = stored_job(&db, "b", vec![Step::Pause]);

        let (queue, rx) = JobQueue::new(Arc::new(WorkerMetrics::new()));
        let handles = dispatcher.spawn(rx);
        queue.enqueue(QueueItem { job_id: job_a }).unwrap();
        queue.enqueue(QueueItem { job_id: job_b }).unwrap();
        drop(queue);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(driver.sessions_opened(), 2);
        assert_eq!(driver.max_concurrent_sessions(), 1);
        assert_eq!(metrics.success_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn worker_pool_processes_all_queued_items() {
        let (dispatcher, _driver, db, metrics, _dir) = harness(SessionScript::default(), 4, 3);
        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(stored_job(&db, &format!("j{i}"), vec![Step::Pause]));
        }

        let (queue, rx) = JobQueue::new(Arc::new(WorkerMetrics::new()));
        let handles = dispatcher.spawn(rx);
        for id in &ids {
            queue.enqueue(QueueItem { job_id: id.clone() }).unwrap();
        }
        drop(queue);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(metrics.success_count(), 6);
        for id in &ids {
            assert_eq!(db.lock().unwrap().list_runs(id).unwrap().len(), 1);
        }
    }
}
