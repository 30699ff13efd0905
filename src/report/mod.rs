// ABOUTME: Drives every job through enumeration and dispatch and aggregates the outcome
// ABOUTME: Applies stop-on-error, logs per-job verdicts and durations as HH:MM:SS

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::commands::CommandSettings;
use crate::config::JobConfig;
use crate::runner::{CommandRunner, JobLog};
use crate::strategy::dispatch_target;
use crate::targets::{enumerate_targets, TableLookup};

/// Format a duration as `HH:MM:SS`. Hours are not capped at 24.
pub fn format_hhmmss(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Passed,
    /// At least one target failed, or the job was rejected before running.
    Failed,
    /// Target lookup failed and left nothing to do.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub alias: String,
    pub status: JobStatus,
    pub targets_attempted: usize,
    pub targets_failed: usize,
    pub elapsed: Duration,
    pub log_path: Option<PathBuf>,
    pub reason: Option<String>,
}

impl JobResult {
    fn new(alias: &str) -> Self {
        Self {
            alias: alias.to_string(),
            status: JobStatus::Passed,
            targets_attempted: 0,
            targets_failed: 0,
            elapsed: Duration::ZERO,
            log_path: None,
            reason: None,
        }
    }
}

/// Per-job results in run order plus total wall-clock time.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub jobs: Vec<JobResult>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    pub fn failed_aliases(&self) -> Vec<&str> {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Failed)
            .map(|j| j.alias.as_str())
            .collect()
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// Stop-on-error fired; no later target or job was attempted.
    Aborted { summary: RunSummary, alias: String },
}

impl RunOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            RunOutcome::Completed(summary) => summary,
            RunOutcome::Aborted { summary, .. } => summary,
        }
    }

    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed(_) => 0,
            RunOutcome::Aborted { .. } => 1,
        }
    }
}

/// Everything a run needs besides the jobs themselves.
pub struct RunContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub lookup: &'a dyn TableLookup,
    pub settings: CommandSettings,
    pub log_dir: PathBuf,
    /// `YYYYMMDD`, used in job log file names.
    pub run_date: String,
    pub stop_on_error: bool,
}

enum JobRun {
    Finished(JobResult),
    Abort(JobResult),
}

/// Run `jobs` one after another.
pub async fn run_jobs(jobs: &[JobConfig], ctx: &RunContext<'_>) -> RunOutcome {
    let started = Instant::now();
    let mut summary = RunSummary::default();

    for job in jobs {
        match run_job(job, ctx).await {
            JobRun::Finished(result) => summary.jobs.push(result),
            JobRun::Abort(result) => {
                let alias = result.alias.clone();
                summary.jobs.push(result);
                summary.elapsed = started.elapsed();
                tracing::error!(alias = %alias, "Stopping run on first error");
                return RunOutcome::Aborted { summary, alias };
            }
        }
    }

    summary.elapsed = started.elapsed();
    tracing::info!(
        passed = summary.count(JobStatus::Passed),
        failed = summary.count(JobStatus::Failed),
        skipped = summary.count(JobStatus::Skipped),
        "Run finished in {}",
        format_hhmmss(summary.elapsed)
    );
    RunOutcome::Completed(summary)
}

async fn run_job(job: &JobConfig, ctx: &RunContext<'_>) -> JobRun {
    let started = Instant::now();
    let mut result = JobResult::new(&job.alias);
    tracing::info!(alias = %job.alias, ">>>>>>>>>>>>>>>>>> Purge started.");

    let strategy = match job.validate() {
        Ok(strategy) => strategy,
        Err(e) => {
            tracing::error!(alias = %job.alias, "{}", e);
            result.status = JobStatus::Failed;
            result.reason = Some(e.to_string());
            return finish(result, started, ctx.stop_on_error);
        }
    };
    tracing::debug!(alias = %job.alias, strategy = strategy.name(), "Job validated");

    let log = match JobLog::open(&ctx.log_dir, &job.alias, &ctx.run_date) {
        Ok(log) => log,
        Err(e) => {
            tracing::error!(alias = %job.alias, error = %format!("{:#}", e), "Cannot open job log");
            result.status = JobStatus::Failed;
            result.reason = Some(format!("{:#}", e));
            return finish(result, started, ctx.stop_on_error);
        }
    };
    result.log_path = Some(log.path().to_path_buf());

    let enumeration = enumerate_targets(job, ctx.lookup).await;
    if let Some(failure) = &enumeration.failure {
        result.reason = Some(failure.to_string());
        if enumeration.targets.is_empty() {
            tracing::warn!(alias = %job.alias, "{}; no targets, job skipped", failure);
            result.status = JobStatus::Skipped;
            result.elapsed = started.elapsed();
            log_finished(&result);
            return JobRun::Finished(result);
        }
        tracing::warn!(
            alias = %job.alias,
            kept = enumeration.targets.len(),
            "{}; continuing with targets found so far",
            failure
        );
    }

    for target in &enumeration.targets {
        result.targets_attempted += 1;
        let dispatched =
            dispatch_target(job, strategy, target, &ctx.settings, ctx.runner, &log).await;
        let exit_code = match dispatched {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(
                    alias = %job.alias,
                    error = %format!("{:#}", e),
                    "Step could not run"
                );
                -1
            }
        };

        if exit_code != 0 {
            result.targets_failed += 1;
            result.status = JobStatus::Failed;
            tracing::error!(
                alias = %job.alias,
                database = %target.database,
                table = %target.table,
                exit_code,
                "<{}> ERROR: Purge Failed. Check {}",
                job.alias,
                log.path().display()
            );
            tracing::info!(alias = %job.alias, ">>>>>>>>>>>>>>>>>> Purge failed.");
            if ctx.stop_on_error {
                result.elapsed = started.elapsed();
                return JobRun::Abort(result);
            }
        }
    }

    result.elapsed = started.elapsed();
    if result.status == JobStatus::Passed {
        tracing::info!(
            alias = %job.alias,
            "OK <{}> Purge complete. Duration: {}.",
            job.alias,
            format_hhmmss(result.elapsed)
        );
    }
    log_finished(&result);
    JobRun::Finished(result)
}

fn finish(mut result: JobResult, started: Instant, stop_on_error: bool) -> JobRun {
    result.elapsed = started.elapsed();
    log_finished(&result);
    if stop_on_error {
        JobRun::Abort(result)
    } else {
        JobRun::Finished(result)
    }
}

fn log_finished(result: &JobResult) {
    tracing::info!(
        alias = %result.alias,
        ">>>>>>>>>>>>>>>>>> Purge finished. Total duration: {}.",
        format_hhmmss(result.elapsed)
    );
}
