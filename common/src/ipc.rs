use serde::{Deserialize, Serialize};

use crate::job::{Job, JobId};
use crate::run::{Run, RunId};

#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    /// Store a job definition. Does not enqueue a run.
    SubmitJob(Job),
    /// Post one execution request for a stored job onto the work queue.
    EnqueueRun(JobId),
    GetJob(JobId),
    GetRun(RunId),
    ListRuns(JobId),
    Metrics,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Error(String),
    JobDetail(Option<Job>),
    RunDetail(Option<Run>),
    RunList(Vec<Run>),
    Metrics {
        success_count: u64,
        failure_count: u64,
        queue_depth: u64,
    },
}
