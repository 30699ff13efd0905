// ABOUTME: Pure construction of the external command lines a purge runs
// ABOUTME: SQL client DDL calls, pt-archiver invocations and the schema dump pipe

use std::fmt;

use crate::config::{Endpoint, JobConfig};
use crate::targets::Target;

pub const DEFAULT_MYSQL_BIN: &str = "mysql";
pub const DEFAULT_MYSQLDUMP_BIN: &str = "mysqldump";
pub const DEFAULT_PT_ARCHIVER_BIN: &str = "/usr/bin/pt-archiver";

/// Which binaries to call and whether this is a simulated run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSettings {
    pub mysql_bin: String,
    pub mysqldump_bin: String,
    pub pt_archiver_bin: String,
    pub simulate: bool,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            mysql_bin: DEFAULT_MYSQL_BIN.to_string(),
            mysqldump_bin: DEFAULT_MYSQLDUMP_BIN.to_string(),
            pt_archiver_bin: DEFAULT_PT_ARCHIVER_BIN.to_string(),
            simulate: false,
        }
    }
}

/// A program and its arguments, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// One unit of external work. The runner treats each family differently in simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// SQL client running DDL. Never spawned when simulating.
    Sql(CommandLine),
    /// pt-archiver. Always spawned; carries `--dry-run` when simulating.
    Archiver(CommandLine),
    /// `producer | consumer`, used to copy a table definition to the destination.
    Pipe {
        producer: CommandLine,
        consumer: CommandLine,
    },
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Invocation::Sql(cmd) | Invocation::Archiver(cmd) => write!(f, "{}", cmd),
            Invocation::Pipe { producer, consumer } => write!(f, "{} | {}", producer, consumer),
        }
    }
}

/// Backtick-quote a MySQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn qualified(database: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(table))
}

/// Replace `table` with an empty copy and drop the old data, in one client call.
pub fn swap_drop_sql(target: &Target) -> String {
    let live = qualified(&target.database, &target.table);
    let fresh = qualified(&target.database, &format!("{}_new", target.table));
    let old = qualified(&target.database, &format!("{}_old", target.table));
    format!(
        "CREATE TABLE {fresh} LIKE {live}; \
         RENAME TABLE {live} TO {old}, {fresh} TO {live}; \
         DROP TABLE {old};"
    )
}

/// Move the live table aside as `swapped` and put an empty copy in its place.
pub fn swap_sql(target: &Target, swapped: &str) -> String {
    let live = qualified(&target.database, &target.table);
    let shadow = qualified(&target.database, &format!("{}_tmp", target.table));
    let aside = qualified(&target.database, swapped);
    format!(
        "CREATE TABLE {shadow} LIKE {live}; RENAME TABLE {live} TO {aside}, {shadow} TO {live};"
    )
}

pub fn drop_sql(target: &Target) -> String {
    format!("DROP TABLE {};", qualified(&target.database, &target.table))
}

/// `mysql <db> -h<host> -P<port> -e<sql>`
pub fn sql_client(
    settings: &CommandSettings,
    endpoint: &Endpoint,
    database: &str,
    sql: &str,
) -> CommandLine {
    CommandLine::new(&settings.mysql_bin)
        .arg(database)
        .arg(format!("-h{}", endpoint.host))
        .arg(format!("-P{}", endpoint.port))
        .arg(format!("-e{}", sql))
}

fn binlog_flag(job: &JobConfig) -> u8 {
    u8::from(job.disable_binlog)
}

/// pt-archiver run moving rows matching the job's WHERE out of `source`.
///
/// Output mode precedence: purge (`DELETE_DATA`), then file (`DEST_FILE`), then insert into
/// `destination` on the job's destination server.
pub fn archiver(
    settings: &CommandSettings,
    job: &JobConfig,
    source: &Target,
    destination: &Target,
) -> CommandLine {
    let mut source_dsn = format!(
        "--source=h={},P={},D={},t={},b={}",
        job.source.host,
        job.source.port,
        source.database,
        source.table,
        binlog_flag(job)
    );
    if let Some(index) = &job.use_index {
        source_dsn.push_str(&format!(",i={}", index));
    }

    let mut cmd = CommandLine::new(&settings.pt_archiver_bin)
        .arg(source_dsn)
        .arg(format!(
            "--where={}",
            job.where_clause.as_deref().unwrap_or_default()
        ))
        .arg(format!("--limit={}", job.limit))
        .arg("--progress=100000")
        .arg("--why-quit")
        .arg("--header")
        .arg(format!("--sleep={}", job.sleep))
        .arg("--statistics")
        .arg("--skip-foreign-key-checks")
        // --bulk-insert should imply this, but pt-archiver needs it spelled out
        .arg("--commit-each")
        .arg("--no-check-charset");

    cmd = if job.delete_data {
        cmd.arg("--bulk-delete").arg("--purge")
    } else if let Some(file) = &job.dest_file {
        cmd.arg("--buffer")
            .arg("--bulk-delete")
            .arg(format!("--file={}", file))
    } else {
        cmd.arg("--bulk-insert").arg(format!(
            "--dest=h={},P={},D={},t={},b={},L=yes",
            job.destination.host,
            job.destination.port,
            destination.database,
            destination.table,
            binlog_flag(job)
        ))
    };

    if settings.simulate {
        cmd = cmd.arg("--dry-run");
    }

    if let Some(extra) = &job.extra_args {
        for arg in extra.split_whitespace() {
            cmd = cmd.arg(arg);
        }
    }

    cmd
}

/// Schema-only dump of `source` on the source server, fed into the client on the destination.
pub fn structure_pipe(
    settings: &CommandSettings,
    job: &JobConfig,
    source: &Target,
    destination_db: &str,
) -> Invocation {
    let producer = CommandLine::new(&settings.mysqldump_bin)
        .arg(format!("-h{}", job.source.host))
        .arg(format!("-P{}", job.source.port))
        .arg("--skip-opt")
        .arg("--no-data")
        .arg("--no-create-db")
        .arg(&source.database)
        .arg(&source.table);
    let consumer = CommandLine::new(&settings.mysql_bin)
        .arg(format!("-h{}", job.destination.host))
        .arg(format!("-P{}", job.destination.port))
        .arg(destination_db);

    Invocation::Pipe { producer, consumer }
}
