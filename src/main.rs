// ABOUTME: Command-line entry point for purge-tables
// ABOUTME: Parses flags, sets up logging, loads the job list and maps the outcome to an exit code

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use purge_tables::commands::{
    CommandSettings, DEFAULT_MYSQLDUMP_BIN, DEFAULT_MYSQL_BIN, DEFAULT_PT_ARCHIVER_BIN,
};
use purge_tables::config::{config_path, JobListDocument};
use purge_tables::logging::{self, DEFAULT_LOG_DIR};
use purge_tables::report::{run_jobs, RunContext};
use purge_tables::runner::ProcessRunner;
use purge_tables::targets::MysqlClientLookup;
use purge_tables::PurgeError;

const DEFAULT_LOCK_PATH: &str = "/var/run/purge_tables.lock";
const EXIT_SETUP_FAILED: i32 = 2;

/// Archive or purge aging rows from MySQL tables, one purge job at a time.
#[derive(Parser, Debug)]
#[command(name = "purge-tables", version, about)]
struct Cli {
    /// Path to the job list (YAML, or TOML with a .toml extension)
    #[arg(short, long, value_name = "PATH")]
    conf: Option<PathBuf>,

    /// Path to lock file. Hold it around the run (e.g. with flock); it is not taken here.
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_LOCK_PATH)]
    lockfile: PathBuf,

    /// Purge job to run
    #[arg(short, long)]
    alias: Option<String>,

    /// Dry run instead of execute
    #[arg(short, long)]
    dry_run: bool,

    /// Stop when one fails
    #[arg(short, long)]
    stop_on_error: bool,

    /// Directory for the run log and per-job command logs
    #[arg(long, value_name = "DIR", default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// Log to stderr instead of the run log file
    #[arg(long)]
    console: bool,

    #[arg(long, value_name = "PATH", default_value = DEFAULT_MYSQL_BIN)]
    mysql_bin: String,

    #[arg(long, value_name = "PATH", default_value = DEFAULT_MYSQLDUMP_BIN)]
    mysqldump_bin: String,

    #[arg(long, value_name = "PATH", default_value = DEFAULT_PT_ARCHIVER_BIN)]
    pt_archiver_bin: String,
}

impl Cli {
    fn command_settings(&self) -> CommandSettings {
        CommandSettings {
            mysql_bin: self.mysql_bin.clone(),
            mysqldump_bin: self.mysqldump_bin.clone(),
            pt_archiver_bin: self.pt_archiver_bin.clone(),
            simulate: self.dry_run,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("{:#}", e);
        std::process::exit(EXIT_SETUP_FAILED);
    }

    let code = match purge(&cli).await {
        Ok(code) => code,
        Err(e) => failure_exit_code(&e),
    };
    std::process::exit(code);
}

/// Log an error that ended the run before any job finished and pick the exit status.
fn failure_exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<PurgeError>() {
        Some(PurgeError::ConfigLoad(_)) => tracing::error!("{:#}", e),
        _ => tracing::error!("Unhandled exception: {:#}", e),
    }
    EXIT_SETUP_FAILED
}

fn init_logging(cli: &Cli) -> Result<()> {
    logging::ensure_log_dir(&cli.log_dir)?;
    if cli.dry_run || cli.console {
        logging::init_console()
    } else {
        logging::init_file(&cli.log_dir).map(|_| ())
    }
}

async fn purge(cli: &Cli) -> Result<i32> {
    tracing::debug!(lockfile = %cli.lockfile.display(), "Lock file path");

    let settings = cli.command_settings();
    warn_missing_binaries(&settings);

    let path = config_path(cli.conf.clone());
    let document = JobListDocument::load(&path)?;

    let run_date = chrono::Local::now().format("%Y%m%d").to_string();
    let jobs = document.resolve(cli.alias.as_deref(), &run_date)?;
    if jobs.is_empty() {
        tracing::warn!(
            config = %path.display(),
            alias = cli.alias.as_deref().unwrap_or("<all>"),
            "No purge jobs matched"
        );
    }

    let runner = ProcessRunner;
    let lookup = MysqlClientLookup::new(&settings.mysql_bin);
    let ctx = RunContext {
        runner: &runner,
        lookup: &lookup,
        settings,
        log_dir: cli.log_dir.clone(),
        run_date,
        stop_on_error: cli.stop_on_error,
    };

    let outcome = run_jobs(&jobs, &ctx).await;
    Ok(outcome.exit_code())
}

fn warn_missing_binaries(settings: &CommandSettings) {
    for bin in [
        &settings.mysql_bin,
        &settings.mysqldump_bin,
        &settings.pt_archiver_bin,
    ] {
        if let Err(e) = which::which(bin) {
            tracing::warn!(binary = %bin, error = %e, "External tool not found");
        }
    }
}
