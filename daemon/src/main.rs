mod config;
mod db;
mod dispatcher;
mod driver;
mod executor;
mod limiter;
mod metrics;
mod orchestrator;
mod queue;
mod webdriver;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;

use common::{JobId, Request, Response};

use config::{Config, LoggingConfig};
use db::Db;
use dispatcher::Dispatcher;
use executor::StepExecutor;
use limiter::DomainLimiter;
use metrics::WorkerMetrics;
use orchestrator::BotOrchestrator;
use queue::{JobQueue, QueueItem};
use webdriver::WebDriverClient;

#[derive(Parser)]
#[command(author, version, about = "Browser-automation job execution daemon")]
struct Args {
    /// Path to a YAML or TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match args.config {
        Some(path) => Config::from_file(&path)?,
        None => {
            let default = PathBuf::from(common::DEFAULT_CONFIG_PATH);
            if default.exists() {
                Config::from_file(&default)?
            } else {
                Config::default()
            }
        }
    };

    setup_logging(&config.logging)?;
    log::info!("Starting formbot-daemon...");

    std::fs::create_dir_all(&config.server.results_dir)
        .with_context(|| format!("Failed to create results dir {:?}", config.server.results_dir))?;
    if let Some(parent) = config.server.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db = Db::new(&config.server.db_path)
        .with_context(|| format!("Failed to open database at {:?}", config.server.db_path))?;

    // Reconcile runs orphaned by a previous crash before accepting work.
    match db.fail_stale_runs(config.server.stale_run_after_secs) {
        Ok(0) => {}
        Ok(swept) => log::warn!("Marked {} stale run(s) as failed after restart", swept),
        Err(e) => log::error!("Stale run sweep failed: {}", e),
    }
    let db = Arc::new(Mutex::new(db));

    let metrics = Arc::new(WorkerMetrics::new());
    let (job_queue, queue_rx) = JobQueue::new(metrics.clone());

    let driver = Arc::new(WebDriverClient::new(&config.server.webdriver_url));
    let executor = StepExecutor::new(driver, config.server.results_dir.clone());
    let orchestrator = Arc::new(BotOrchestrator::new(executor));
    let limiter = Arc::new(DomainLimiter::new(config.server.per_domain_concurrency));

    let dispatcher = Arc::new(Dispatcher::new(
        db.clone(),
        limiter,
        orchestrator,
        metrics.clone(),
        config.server.worker_concurrency,
    ));
    dispatcher.spawn(queue_rx);
    log::info!(
        "Dispatcher running with {} worker(s), {} per-host slot(s)",
        config.server.worker_concurrency,
        config.server.per_domain_concurrency
    );

    {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
            tick.tick().await;
            loop {
                tick.tick().await;
                log::debug!("{}", metrics.export());
            }
        });
    }

    let socket_path = &config.server.socket_path;
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind socket {:?}", socket_path))?;
    println!("Listening on {}", socket_path.display());

    // Set socket permissions to allow all users to connect
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(socket_path)?.permissions();
    perms.set_mode(0o666);
    std::fs::set_permissions(socket_path, perms)?;

    loop {
        let (mut socket, _) = listener.accept().await?;
        let db = db.clone();
        let job_queue = job_queue.clone();
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buf = vec![0; 64 * 1024];
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) => return,
                    Ok(n) => n,
                    Err(e) => {
                        log::error!("failed to read from socket; err = {:?}", e);
                        return;
                    }
                };

                let req: Request = match serde_json::from_slice(&buf[0..n]) {
                    Ok(req) => req,
                    Err(e) => {
                        log::error!("failed to deserialize request; err = {:?}", e);
                        return;
                    }
                };

                log::info!("Received request: {:?}", req);
                let resp = serve(req, &db, &job_queue, &metrics);

                let resp_bytes = match serde_json::to_vec(&resp) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::error!("failed to serialize response; err = {:?}", e);
                        return;
                    }
                };
                if let Err(e) = socket.write_all(&resp_bytes).await {
                    log::error!("failed to write to socket; err = {:?}", e);
                    return;
                }
            }
        });
    }
}

fn serve(
    req: Request,
    db: &Arc<Mutex<Db>>,
    job_queue: &JobQueue,
    metrics: &WorkerMetrics,
) -> Response {
    match req {
        Request::SubmitJob(job) => {
            if let Err(e) = job.validate() {
                return Response::Error(format!("Invalid job: {e}"));
            }
            match db.lock().unwrap().add_job(&job) {
                Ok(()) => Response::Ok,
                Err(e) => Response::Error(format!("DB Error: {e}")),
            }
        }
        Request::EnqueueRun(job_id) => enqueue_run(job_id, db, job_queue),
        Request::GetJob(job_id) => match db.lock().unwrap().get_job(&job_id) {
            Ok(job) => Response::JobDetail(job),
            Err(e) => Response::Error(format!("DB Error: {e}")),
        },
        Request::GetRun(run_id) => match db.lock().unwrap().get_run(&run_id) {
            Ok(run) => Response::RunDetail(run),
            Err(e) => Response::Error(format!("DB Error: {e}")),
        },
        Request::ListRuns(job_id) => match db.lock().unwrap().list_runs(&job_id) {
            Ok(runs) => Response::RunList(runs),
            Err(e) => Response::Error(format!("DB Error: {e}")),
        },
        Request::Metrics => Response::Metrics {
            success_count: metrics.success_count(),
            failure_count: metrics.failure_count(),
            queue_depth: metrics.queue_depth(),
        },
    }
}

fn enqueue_run(job_id: JobId, db: &Arc<Mutex<Db>>, job_queue: &JobQueue) -> Response {
    // Early existence check is a courtesy to the caller only; the
    // dispatcher re-checks at lease time (at-least-once delivery).
    match db.lock().unwrap().get_job(&job_id) {
        Ok(Some(_)) => {}
        Ok(None) => return Response::Error(format!("Job not found: {job_id}")),
        Err(e) => return Response::Error(format!("DB Error: {e}")),
    }
    match job_queue.enqueue(QueueItem { job_id }) {
        Ok(()) => Response::Ok,
        Err(e) => Response::Error(e.to_string()),
    }
}

fn setup_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let log_file = logging.output.clone().unwrap_or_else(|| {
        std::env::var("FORMBOT_LOG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(common::DEFAULT_LOG_FILE))
    });
    let runs_log_file = std::env::var("FORMBOT_RUNS_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(common::DEFAULT_RUNS_LOG_FILE));

    let level = logging
        .level
        .parse::<log::LevelFilter>()
        .unwrap_or(log::LevelFilter::Info);

    let base_config = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d][%H:%M:%S"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level);

    // Main log file: filter OUT run_output
    let main_log = fern::Dispatch::new()
        .filter(|metadata| metadata.target() != "run_output")
        .chain(std::io::stdout())
        .chain(fern::log_file(&log_file)?);

    // Runs log file: filter IN run_output
    let runs_log = fern::Dispatch::new()
        .filter(|metadata| metadata.target() == "run_output")
        .chain(fern::log_file(&runs_log_file)?);

    base_config.chain(main_log).chain(runs_log).apply()?;

    Ok(())
}
