// ABOUTME: Executes built commands synchronously against a per-job append-mode log
// ABOUTME: Simulation prints SQL instead of running it and surfaces archiver dry-run output

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::commands::{CommandLine, Invocation};
use crate::error::PurgeError;

/// Append-only log receiving the output of every command run for one job.
///
/// Opened once per job; every step and target of the job writes to the same file.
#[derive(Debug)]
pub struct JobLog {
    path: PathBuf,
    file: File,
}

impl JobLog {
    /// Open `<dir>/purge_tables-<alias>-<date>.log` for appending.
    pub fn open(dir: &Path, alias: &str, date: &str) -> Result<Self> {
        let path = dir.join(log_file_name(alias, date));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open job log {}", path.display()))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stdio(&self) -> Result<Stdio> {
        let handle = self
            .file
            .try_clone()
            .with_context(|| format!("Failed to share job log {}", self.path.display()))?;
        Ok(Stdio::from(handle))
    }
}

/// File name for a job's command log. Characters unsafe in a file name become `_`.
pub fn log_file_name(alias: &str, date: &str) -> String {
    let alias: String = alias
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("purge_tables-{}-{}.log", alias, date)
}

/// Exit status of one invocation and the log its output went to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub log_path: PathBuf,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `invocation` to completion. `Err` means it could not be started at all.
    ///
    /// `simulate` must be the same flag the invocation was built with
    /// ([`CommandSettings::simulate`](crate::commands::CommandSettings)).
    async fn run(
        &self,
        invocation: &Invocation,
        simulate: bool,
        log: &JobLog,
    ) -> Result<ExecutionOutcome>;
}

/// Runs commands as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    async fn execute(&self, cmd: &CommandLine, log: &JobLog) -> Result<i32> {
        let status = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdout(log.stdio()?)
            .stderr(log.stdio()?)
            .status()
            .await
            .map_err(|e| spawn_error(cmd, e))?;
        Ok(exit_code(status))
    }

    async fn execute_pipe(
        &self,
        producer: &CommandLine,
        consumer: &CommandLine,
        log: &JobLog,
    ) -> Result<i32> {
        let mut dump = Command::new(&producer.program)
            .args(&producer.args)
            .stdout(Stdio::piped())
            .stderr(log.stdio()?)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(producer, e))?;

        let load_status = match Self::load_from(&mut dump, producer, consumer, log).await {
            Ok(status) => status,
            Err(e) => {
                // Stop and reap the dump before reporting the failure.
                if let Err(kill_err) = dump.kill().await {
                    tracing::warn!(error = %kill_err, "Failed to stop {}", producer.program);
                }
                return Err(e);
            }
        };
        let dump_status = dump.wait().await.context("Failed to wait for dump process")?;

        // The client exits 0 on the empty script a failed dump leaves behind.
        let load_code = exit_code(load_status);
        if load_code == 0 {
            Ok(exit_code(dump_status))
        } else {
            Ok(load_code)
        }
    }

    /// Start `consumer` reading from `dump`'s stdout and wait for it.
    async fn load_from(
        dump: &mut Child,
        producer: &CommandLine,
        consumer: &CommandLine,
        log: &JobLog,
    ) -> Result<ExitStatus> {
        let dump_out = dump
            .stdout
            .take()
            .ok_or_else(|| PurgeError::Command(format!("no stdout from {}", producer.program)))?;
        let consumer_stdin = TryInto::<Stdio>::try_into(dump_out)
            .context("Failed to connect dump output to client input")?;

        Command::new(&consumer.program)
            .args(&consumer.args)
            .stdin(consumer_stdin)
            .stdout(log.stdio()?)
            .stderr(log.stdio()?)
            .status()
            .await
            .map_err(|e| spawn_error(consumer, e))
    }

    async fn simulate_archiver(&self, cmd: &CommandLine) -> Result<i32> {
        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .output()
            .await
            .map_err(|e| spawn_error(cmd, e))?;
        println!("{}", String::from_utf8_lossy(&output.stdout));
        println!("{}", String::from_utf8_lossy(&output.stderr));
        Ok(exit_code(output.status))
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        simulate: bool,
        log: &JobLog,
    ) -> Result<ExecutionOutcome> {
        let exit_code = match (invocation, simulate) {
            (Invocation::Sql(cmd), true) => {
                println!("{}", cmd);
                println!("[NOTE: dry-run just shows the SQL]");
                0
            }
            (Invocation::Pipe { producer, consumer }, true) => {
                println!("{}", producer);
                println!("{}", consumer);
                0
            }
            (Invocation::Archiver(cmd), true) => self.simulate_archiver(cmd).await?,
            (Invocation::Sql(cmd), false) | (Invocation::Archiver(cmd), false) => {
                self.execute(cmd, log).await?
            }
            (Invocation::Pipe { producer, consumer }, false) => {
                self.execute_pipe(producer, consumer, log).await?
            }
        };

        Ok(ExecutionOutcome {
            exit_code,
            log_path: log.path().to_path_buf(),
        })
    }
}

fn spawn_error(cmd: &CommandLine, err: std::io::Error) -> anyhow::Error {
    PurgeError::Command(format!("failed to start {}: {}", cmd.program, err)).into()
}

/// Killed-by-signal has no code; report it as a generic failure.
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_binary() -> CommandLine {
        CommandLine::new("/nonexistent/purge-tables-test-binary").arg("--version")
    }

    #[test]
    fn test_log_file_name_sanitizes_alias() {
        assert_eq!(
            log_file_name("orders/eu west", "20240102"),
            "purge_tables-orders_eu_west-20240102.log"
        );
    }

    #[test]
    fn test_job_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("purge_tables-a-20240102.log"), "earlier\n").unwrap();

        let log = JobLog::open(dir.path(), "a", "20240102").unwrap();
        assert_eq!(log.path(), dir.path().join("purge_tables-a-20240102.log"));
        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents, "earlier\n");
    }

    #[tokio::test]
    async fn test_simulated_sql_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let log = JobLog::open(dir.path(), "a", "20240102").unwrap();
        let runner = ProcessRunner;

        let outcome = runner
            .run(&Invocation::Sql(missing_binary()), true, &log)
            .await
            .unwrap();
        assert!(outcome.success());

        let pipe = Invocation::Pipe {
            producer: missing_binary(),
            consumer: missing_binary(),
        };
        assert!(runner.run(&pipe, true, &log).await.unwrap().success());
    }

    #[tokio::test]
    async fn test_simulated_archiver_is_spawned() {
        let dir = tempfile::tempdir().unwrap();
        let log = JobLog::open(dir.path(), "a", "20240102").unwrap();
        let runner = ProcessRunner;

        let err = runner
            .run(&Invocation::Archiver(missing_binary()), true, &log)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PurgeError>(),
            Some(PurgeError::Command(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_writes_output_to_job_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = JobLog::open(dir.path(), "a", "20240102").unwrap();
        let runner = ProcessRunner;

        let ok = CommandLine::new("sh").arg("-c").arg("echo archived; echo warn >&2");
        let outcome = runner.run(&Invocation::Sql(ok), false, &log).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.log_path, log.path());

        let failing = CommandLine::new("sh").arg("-c").arg("exit 3");
        let outcome = runner.run(&Invocation::Sql(failing), false, &log).await.unwrap();
        assert_eq!(outcome.exit_code, 3);

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert!(contents.contains("archived"));
        assert!(contents.contains("warn"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipe_feeds_consumer_and_reports_dump_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = JobLog::open(dir.path(), "a", "20240102").unwrap();
        let runner = ProcessRunner;

        let pipe = Invocation::Pipe {
            producer: CommandLine::new("sh").arg("-c").arg("echo CREATE TABLE t"),
            consumer: CommandLine::new("cat"),
        };
        assert!(runner.run(&pipe, false, &log).await.unwrap().success());
        assert!(std::fs::read_to_string(log.path())
            .unwrap()
            .contains("CREATE TABLE t"));

        let broken_dump = Invocation::Pipe {
            producer: CommandLine::new("sh").arg("-c").arg("exit 2"),
            consumer: CommandLine::new("cat"),
        };
        assert_eq!(runner.run(&broken_dump, false, &log).await.unwrap().exit_code, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipe_stops_dump_when_client_cannot_start() {
        let dir = tempfile::tempdir().unwrap();
        let log = JobLog::open(dir.path(), "a", "20240102").unwrap();
        let marker = dir.path().join("dump-finished");

        let pipe = Invocation::Pipe {
            producer: CommandLine::new("sh")
                .arg("-c")
                .arg(format!("sleep 1; touch {}", marker.display())),
            consumer: missing_binary(),
        };
        let err = ProcessRunner.run(&pipe, false, &log).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PurgeError>(),
            Some(PurgeError::Command(_))
        ));

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
