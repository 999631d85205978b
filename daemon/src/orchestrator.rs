use rand::Rng;
use std::time::Duration;

use common::{Job, MultiBotConfig, ProxyConfig, RunId};

use crate::executor::{AgentJob, RunReport, StepExecutor};

/// Expands one run into 1..N agent executions per the job's multi-bot
/// config. Agents run strictly sequentially so resource usage (browser
/// sessions, proxy connections) stays bounded regardless of count.
///
/// Never fails: per-agent errors are folded into the aggregate report.
pub struct BotOrchestrator {
    executor: StepExecutor,
}

impl BotOrchestrator {
    pub fn new(executor: StepExecutor) -> Self {
        Self { executor }
    }

    pub async fn run_job<R: Rng + Send>(
        &self,
        job: &Job,
        run_id: &RunId,
        rng: &mut R,
    ) -> RunReport {
        match job.config.as_ref().and_then(|c| c.multi_bot.as_ref()) {
            Some(multi) if multi.enabled => self.run_multi(job, run_id, multi, rng).await,
            // Single agent with the job's base identity; its report is the
            // run's report, unchanged.
            _ => {
                let agent = AgentJob {
                    job_id: &job.id,
                    url: &job.url,
                    steps: &job.steps,
                    config: job.config.as_ref(),
                    run_id: run_id.0.clone(),
                };
                self.executor.run_agent(&agent, rng).await
            }
        }
    }

    async fn run_multi<R: Rng + Send>(
        &self,
        job: &Job,
        run_id: &RunId,
        multi: &MultiBotConfig,
        rng: &mut R,
    ) -> RunReport {
        let count = multi.count.max(1) as usize;
        log::info!("Job {}: starting multi-bot execution with {} bots", job.id, count);

        let mut all_ok = true;
        let mut logs = Vec::with_capacity(count);

        for i in 0..count {
            let mut agent_config = job.config.clone().unwrap_or_default();

            if !multi.proxies.is_empty() {
                let idx = if multi.randomize_order {
                    rng.gen_range(0..multi.proxies.len())
                } else {
                    i % multi.proxies.len()
                };
                agent_config.proxy = Some(ProxyConfig {
                    server: Some(multi.proxies[idx].clone()),
                    ..Default::default()
                });
            }

            if !multi.devices.is_empty() {
                let idx = if multi.randomize_order {
                    rng.gen_range(0..multi.devices.len())
                } else {
                    i % multi.devices.len()
                };
                agent_config.device = Some(multi.devices[idx].clone());
            }

            let agent = AgentJob {
                job_id: &job.id,
                url: &job.url,
                steps: &job.steps,
                config: Some(&agent_config),
                // Derived identity for artifact naming only; no separate
                // run record exists per agent.
                run_id: format!("{}-bot-{}", run_id, i + 1),
            };

            log::info!("Job {}: starting bot {}/{}", job.id, i + 1, count);
            let result = self.executor.run_agent(&agent, rng).await;
            all_ok &= result.ok;
            logs.push(format!("Bot {}: {}", i + 1, result.logs));

            // Deliberate pacing between agents, not error recovery.
            if multi.delay_between_bots_ms > 0 && i + 1 < count {
                tokio::time::sleep(Duration::from_millis(multi.delay_between_bots_ms)).await;
            }
        }

        RunReport {
            ok: all_ok,
            logs: logs.join("\n"),
            error: None,
            screenshot: None,
        }
    }
}
