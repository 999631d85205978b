use clap::{Parser, Subcommand};
use common::{Job, JobConfig, JobId, Request, Response, RunId, Step};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Daemon socket path (defaults to the system socket)
    #[arg(long)]
    socket: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job from a YAML or JSON file
    Submit {
        /// Path to the job file
        file: PathBuf,
        /// Store the job without enqueuing a run
        #[arg(long)]
        no_run: bool,
    },
    /// Enqueue a run for a stored job
    Run {
        job_id: String,
    },
    /// List runs of a job
    Runs {
        job_id: String,
    },
    /// Show one run in full, including its logs
    ShowRun {
        run_id: String,
    },
    /// Get job details
    Get {
        job_id: String,
    },
    /// Show daemon counters
    Metrics,
}

/// On-disk job shape: `id` is optional and defaults to the file stem.
#[derive(serde::Deserialize)]
struct JobFile {
    id: Option<String>,
    url: String,
    #[serde(default)]
    steps: Vec<Step>,
    config: Option<JobConfig>,
}

fn load_job(path: &Path) -> anyhow::Result<Job> {
    let text = std::fs::read_to_string(path)?;
    let parsed: JobFile = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text)?,
        _ => serde_yaml::from_str(&text)?,
    };

    let id = match parsed.id {
        Some(id) => id,
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Cannot derive a job id from {:?}", path))?,
    };

    Ok(Job {
        id: JobId(id),
        url: parsed.url,
        steps: parsed.steps,
        config: parsed.config,
    })
}

async fn connect(socket: Option<PathBuf>) -> anyhow::Result<UnixStream> {
    if let Some(path) = socket {
        return Ok(UnixStream::connect(path).await?);
    }
    match UnixStream::connect(common::DEFAULT_SOCKET_PATH).await {
        Ok(stream) => Ok(stream),
        Err(_) => Ok(UnixStream::connect(common::USER_SOCKET_PATH).await?),
    }
}

async fn request(stream: &mut UnixStream, req: &Request) -> anyhow::Result<Response> {
    let req_bytes = serde_json::to_vec(req)?;
    stream.write_all(&req_bytes).await?;

    let mut buf = vec![0; 64 * 1024];
    let n = stream.read(&mut buf).await?;
    Ok(serde_json::from_slice(&buf[0..n])?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut stream = connect(cli.socket).await?;

    match cli.command {
        Commands::Submit { file, no_run } => {
            let job = load_job(&file)?;
            let job_id = job.id.clone();
            match request(&mut stream, &Request::SubmitJob(job)).await? {
                Response::Ok => println!("Submitted job {}", job_id),
                Response::Error(e) => {
                    eprintln!("Error: {}", e);
                    return Ok(());
                }
                other => anyhow::bail!("unexpected response: {:?}", other),
            }
            if !no_run {
                print_response(request(&mut stream, &Request::EnqueueRun(job_id)).await?);
            }
        }
        Commands::Run { job_id } => {
            print_response(request(&mut stream, &Request::EnqueueRun(JobId(job_id))).await?);
        }
        Commands::Runs { job_id } => {
            print_response(request(&mut stream, &Request::ListRuns(JobId(job_id))).await?);
        }
        Commands::ShowRun { run_id } => {
            print_response(request(&mut stream, &Request::GetRun(RunId(run_id))).await?);
        }
        Commands::Get { job_id } => {
            print_response(request(&mut stream, &Request::GetJob(JobId(job_id))).await?);
        }
        Commands::Metrics => {
            print_response(request(&mut stream, &Request::Metrics).await?);
        }
    }

    Ok(())
}

fn print_response(resp: Response) {
    match resp {
        Response::Ok => println!("Success"),
        Response::Error(e) => eprintln!("Error: {}", e),
        Response::JobDetail(job_opt) => {
            if let Some(job) = job_opt {
                println!("Job Details:");
                println!("  ID:    {}", job.id);
                println!("  URL:   {}", job.url);
                println!("  Steps:");
                for (i, step) in job.steps.iter().enumerate() {
                    println!("    {}. {:?}", i + 1, step);
                }
                if let Some(config) = job.config {
                    println!("  Config: {:?}", config);
                }
            } else {
                println!("Job not found.");
            }
        }
        Response::RunDetail(run_opt) => {
            if let Some(run) = run_opt {
                println!("Run Details:");
                println!("  ID:       {}", run.id);
                println!("  Job:      {}", run.job_id);
                println!("  Status:   {}", run.status);
                println!("  Started:  {}", run.started_at);
                if let Some(finished) = run.finished_at {
                    println!("  Finished: {}", finished);
                }
                if let Some(error) = run.error {
                    println!("  Error:    {}", error);
                }
                if let Some(screenshot) = run.screenshot {
                    println!("  Capture:  {}", screenshot);
                }
                if !run.logs.is_empty() {
                    println!("  Logs:");
                    for line in run.logs.lines() {
                        println!("    {}", line);
                    }
                }
            } else {
                println!("Run not found.");
            }
        }
        Response::RunList(runs) => {
            println!("{:<38} {:<10} {:<26} {:<26}", "ID", "Status", "Started", "Finished");
            for run in runs {
                let finished = run
                    .finished_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<38} {:<10} {:<26} {:<26}",
                    run.id,
                    run.status,
                    run.started_at.to_rfc3339(),
                    finished
                );
            }
        }
        Response::Metrics {
            success_count,
            failure_count,
            queue_depth,
        } => {
            println!("Succeeded:   {}", success_count);
            println!("Failed:      {}", failure_count);
            println!("Queue depth: {}", queue_depth);
        }
    }
}
