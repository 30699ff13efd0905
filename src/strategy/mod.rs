// ABOUTME: Table retirement strategies and the step sequence each one runs per target
// ABOUTME: Steps run in order and stop at the first non-zero exit status

use anyhow::Result;

use crate::commands::{self, CommandSettings, Invocation};
use crate::config::JobConfig;
use crate::runner::{CommandRunner, JobLog};
use crate::targets::Target;

/// How a table's old rows are retired, selected by the job's `SWAP_DROP` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetirementStrategy {
    /// `0`: pt-archiver moves matching rows out of the live table.
    ArchiveOnly,
    /// `1`: the live table is swapped for an empty copy and the old one dropped.
    SwapDrop,
    /// `2`: swap the live table aside, archive it from there, then drop it.
    SwapArchiveDrop,
}

impl RetirementStrategy {
    pub fn from_selector(selector: i64) -> Option<Self> {
        match selector {
            0 => Some(Self::ArchiveOnly),
            1 => Some(Self::SwapDrop),
            2 => Some(Self::SwapArchiveDrop),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ArchiveOnly => "archive",
            Self::SwapDrop => "swap-drop",
            Self::SwapArchiveDrop => "swap-archive-drop",
        }
    }
}

/// One gated unit of work for a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Archive `source` rows; `destination` is where inserted rows land.
    Archive { source: Target, destination: Target },
    SwapDrop { target: Target },
    /// Rename `target` to `swapped` behind an empty copy, then create `swapped` on the
    /// destination server in `destination_db`.
    Swap {
        target: Target,
        swapped: Target,
        destination_db: String,
    },
    Drop { target: Target },
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Archive { .. } => "archive",
            Step::SwapDrop { .. } => "swap-drop",
            Step::Swap { .. } => "swap",
            Step::Drop { .. } => "drop",
        }
    }

    /// Commands for this step, each gated on the previous one succeeding.
    pub fn invocations(&self, job: &JobConfig, settings: &CommandSettings) -> Vec<Invocation> {
        match self {
            Step::Archive {
                source,
                destination,
            } => vec![Invocation::Archiver(commands::archiver(
                settings,
                job,
                source,
                destination,
            ))],
            Step::SwapDrop { target } => vec![Invocation::Sql(commands::sql_client(
                settings,
                &job.source,
                &target.database,
                &commands::swap_drop_sql(target),
            ))],
            Step::Swap {
                target,
                swapped,
                destination_db,
            } => vec![
                Invocation::Sql(commands::sql_client(
                    settings,
                    &job.source,
                    &target.database,
                    &commands::swap_sql(target, &swapped.table),
                )),
                commands::structure_pipe(settings, job, swapped, destination_db),
            ],
            Step::Drop { target } => vec![Invocation::Sql(commands::sql_client(
                settings,
                &job.source,
                &target.database,
                &commands::drop_sql(target),
            ))],
        }
    }
}

/// The steps `strategy` runs for `target`, in order.
///
/// The swapped table name for the archive step is derived here and carried in the step,
/// leaving `job` untouched for the next target.
pub fn plan_steps(strategy: RetirementStrategy, job: &JobConfig, target: &Target) -> Vec<Step> {
    let destination_db = job
        .dest_db
        .clone()
        .unwrap_or_else(|| target.database.clone());

    match strategy {
        RetirementStrategy::ArchiveOnly => {
            let destination_table = job
                .dest_table
                .clone()
                .unwrap_or_else(|| target.table.clone());
            vec![Step::Archive {
                source: target.clone(),
                destination: Target::new(destination_db, destination_table),
            }]
        }
        RetirementStrategy::SwapDrop => vec![Step::SwapDrop {
            target: target.clone(),
        }],
        RetirementStrategy::SwapArchiveDrop => {
            let swapped_name = format!("{}_{}", target.table, job.swap_suffix);
            let swapped = Target::new(&target.database, &swapped_name);
            vec![
                Step::Swap {
                    target: target.clone(),
                    swapped: swapped.clone(),
                    destination_db: destination_db.clone(),
                },
                Step::Archive {
                    source: swapped.clone(),
                    destination: Target::new(destination_db, swapped_name),
                },
                Step::Drop { target: swapped },
            ]
        }
    }
}

/// Run every step for one target and return its exit status.
///
/// The first non-zero status ends the sequence and becomes the target's result.
pub async fn dispatch_target(
    job: &JobConfig,
    strategy: RetirementStrategy,
    target: &Target,
    settings: &CommandSettings,
    runner: &dyn CommandRunner,
    log: &JobLog,
) -> Result<i32> {
    for step in plan_steps(strategy, job, target) {
        for invocation in step.invocations(job, settings) {
            tracing::info!(
                alias = %job.alias,
                database = %target.database,
                table = %target.table,
                step = step.kind(),
                "<{}> ---> Running: {}",
                job.alias,
                invocation
            );

            let outcome = runner.run(&invocation, settings.simulate, log).await?;
            if !outcome.success() {
                tracing::warn!(
                    alias = %job.alias,
                    step = step.kind(),
                    exit_code = outcome.exit_code,
                    "Step failed, skipping remaining steps for {}.{}",
                    target.database,
                    target.table
                );
                return Ok(outcome.exit_code);
            }
        }
    }

    Ok(0)
}
