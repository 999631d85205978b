use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result};
use uuid::Uuid;

use common::{Job, JobConfig, JobId, Run, RunId, RunStatus, Step};

/// SQLite-backed job/run store. Jobs are immutable once inserted; runs are
/// created by the dispatcher and moved through their lifecycle by it alone.
pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn new(path: &std::path::Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Private in-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                steps_json TEXT NOT NULL,
                config_json TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                logs TEXT NOT NULL DEFAULT '',
                error TEXT,
                screenshot TEXT
            )",
            [],
        )?;

        Ok(Self { conn })
    }

    pub fn add_job(&self, job: &Job) -> Result<()> {
        let steps_json = serde_json::to_string(&job.steps).unwrap_or_else(|_| "[]".to_string());
        let config_json = job
            .config
            .as_ref()
            .and_then(|c| serde_json::to_string(c).ok());

        self.conn.execute(
            "INSERT OR REPLACE INTO jobs (id, url, steps_json, config_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![job.id.0, job.url, steps_json, config_json, now_str()],
        )?;
        Ok(())
    }

    pub fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        self.conn
            .query_row(
                "SELECT id, url, steps_json, config_json FROM jobs WHERE id = ?1",
                params![id.0],
                |row| {
                    let id: String = row.get(0)?;
                    let url: String = row.get(1)?;
                    let steps_json: String = row.get(2)?;
                    let config_json: Option<String> = row.get(3)?;

                    let steps: Vec<Step> = serde_json::from_str(&steps_json).unwrap_or_default();
                    let config: Option<JobConfig> =
                        config_json.and_then(|c| serde_json::from_str(&c).ok());

                    Ok(Job {
                        id: JobId(id),
                        url,
                        steps,
                        config,
                    })
                },
            )
            .optional()
    }

    /// Creates a run already RUNNING: the dispatcher calls this at lease
    /// time, so there is no observable PENDING window in this store.
    pub fn create_run(&self, job_id: &JobId) -> Result<Run> {
        let run = Run {
            id: RunId(Uuid::new_v4().to_string()),
            job_id: job_id.clone(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            logs: String::new(),
            error: None,
            screenshot: None,
        };
        self.conn.execute(
            "INSERT INTO runs (id, job_id, status, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                run.id.0,
                run.job_id.0,
                run.status.as_str(),
                fmt_time(&run.started_at)
            ],
        )?;
        Ok(run)
    }

    /// Moves a run to its terminal state with the outcome fields.
    pub fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        logs: &str,
        error: Option<&str>,
        screenshot: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE runs SET status = ?2, logs = ?3, error = ?4, screenshot = ?5, finished_at = ?6
             WHERE id = ?1",
            params![run_id.0, status.as_str(), logs, error, screenshot, now_str()],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &RunId) -> Result<Option<Run>> {
        self.conn
            .query_row(
                "SELECT id, job_id, status, started_at, finished_at, logs, error, screenshot
                 FROM runs WHERE id = ?1",
                params![run_id.0],
                row_to_run,
            )
            .optional()
    }

    pub fn list_runs(&self, job_id: &JobId) -> Result<Vec<Run>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_id, status, started_at, finished_at, logs, error, screenshot
             FROM runs WHERE job_id = ?1 ORDER BY started_at DESC",
        )?;
        let run_iter = stmt.query_map(params![job_id.0], row_to_run)?;

        let mut runs = Vec::new();
        for run in run_iter {
            runs.push(run?);
        }
        Ok(runs)
    }

    /// Reconciliation sweep for runs orphaned by a crash: any non-terminal
    /// run whose start is older than the threshold is marked FAILED.
    /// Returns the number of runs swept.
    pub fn fail_stale_runs(&self, older_than_secs: u64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(older_than_secs as i64);
        let swept = self.conn.execute(
            "UPDATE runs SET status = 'FAILED',
                             error = 'WorkerCrashed: daemon restarted while run was in flight',
                             finished_at = ?2
             WHERE status IN ('PENDING', 'RUNNING') AND started_at < ?1",
            params![fmt_time(&cutoff), now_str()],
        )?;
        Ok(swept)
    }
}

fn fmt_time(t: &DateTime<Utc>) -> String {
    // Fixed-width UTC timestamps so stored strings order chronologically.
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn now_str() -> String {
    fmt_time(&Utc::now())
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let id: String = row.get(0)?;
    let job_id: String = row.get(1)?;
    let status: String = row.get(2)?;
    let started_at: String = row.get(3)?;
    let finished_at: Option<String> = row.get(4)?;
    let logs: String = row.get(5)?;
    let error: Option<String> = row.get(6)?;
    let screenshot: Option<String> = row.get(7)?;

    Ok(Run {
        id: RunId(id),
        job_id: JobId(job_id),
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
        started_at: parse_time(&started_at),
        finished_at: finished_at.as_deref().map(parse_time),
        logs,
        error,
        screenshot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Step;

    fn sample_job(id: &str) -> Job {
        Job {
            id: JobId(id.to_string()),
            url: "https://example.com/contact".to_string(),
            steps: vec![
                Step::Fill {
                    selector: Some("input[name='name']".to_string()),
                    value: Some("Alec".to_string()),
                },
                Step::Click {
                    selector: Some("button[type='submit']".to_string()),
                },
            ],
            config: None,
        }
    }

    #[test]
    fn job_round_trips_with_steps_and_config() {
        let db = Db::in_memory().unwrap();
        let mut job = sample_job("j1");
        job.config = Some(JobConfig {
            fingerprint_masking: true,
            ..Default::default()
        });
        db.add_job(&job).unwrap();

        let loaded = db.get_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.url, job.url);
        assert_eq!(loaded.steps, job.steps);
        assert!(loaded.config.unwrap().fingerprint_masking);
    }

    #[test]
    fn missing_job_is_none() {
        let db = Db::in_memory().unwrap();
        assert!(db.get_job(&JobId("nope".to_string())).unwrap().is_none());
    }

    #[test]
    fn run_lifecycle_running_to_success() {
        let db = Db::in_memory().unwrap();
        let job = sample_job("j1");
        db.add_job(&job).unwrap();

        let run = db.create_run(&job.id).unwrap();
        assert_eq!(run.status, RunStatus::Running);

        db.finish_run(&run.id, RunStatus::Success, "line1\nline2", None, None)
            .unwrap();
        let loaded = db.get_run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Success);
        assert_eq!(loaded.logs, "line1\nline2");
        assert!(loaded.finished_at.is_some());
        assert!(loaded.error.is_none());
    }

    #[test]
    fn failed_run_keeps_error_and_screenshot() {
        let db = Db::in_memory().unwrap();
        let job = sample_job("j1");
        db.add_job(&job).unwrap();

        let run = db.create_run(&job.id).unwrap();
        db.finish_run(
            &run.id,
            RunStatus::Failed,
            "partial log",
            Some("element not found: #success"),
            Some("/results/j1-r1-123.png"),
        )
        .unwrap();

        let loaded = db.get_run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("element not found: #success"));
        assert_eq!(loaded.screenshot.as_deref(), Some("/results/j1-r1-123.png"));
    }

    #[test]
    fn list_runs_is_scoped_to_job() {
        let db = Db::in_memory().unwrap();
        db.add_job(&sample_job("j1")).unwrap();
        db.add_job(&sample_job("j2")).unwrap();

        db.create_run(&JobId("j1".to_string())).unwrap();
        db.create_run(&JobId("j1".to_string())).unwrap();
        db.create_run(&JobId("j2".to_string())).unwrap();

        assert_eq!(db.list_runs(&JobId("j1".to_string())).unwrap().len(), 2);
        assert_eq!(db.list_runs(&JobId("j2".to_string())).unwrap().len(), 1);
    }

    #[test]
    fn stale_sweep_fails_only_old_non_terminal_runs() {
        let db = Db::in_memory().unwrap();
        db.add_job(&sample_job("j1")).unwrap();

        let stale = db.create_run(&JobId("j1".to_string())).unwrap();
        let finished = db.create_run(&JobId("j1".to_string())).unwrap();
        let fresh = db.create_run(&JobId("j1".to_string())).unwrap();
        db.finish_run(&finished.id, RunStatus::Success, "", None, None)
            .unwrap();

        // Backdate the stale run past the threshold.
        let old = Utc::now() - chrono::Duration::hours(2);
        db.conn
            .execute(
                "UPDATE runs SET started_at = ?2 WHERE id = ?1",
                params![stale.id.0, fmt_time(&old)],
            )
            .unwrap();

        let swept = db.fail_stale_runs(3600).unwrap();
        assert_eq!(swept, 1);

        let stale = db.get_run(&stale.id).unwrap().unwrap();
        assert_eq!(stale.status, RunStatus::Failed);
        assert!(stale.error.unwrap().contains("WorkerCrashed"));

        // Terminal and fresh runs are untouched.
        assert_eq!(db.get_run(&finished.id).unwrap().unwrap().status, RunStatus::Success);
        assert_eq!(db.get_run(&fresh.id).unwrap().unwrap().status, RunStatus::Running);
    }
}
