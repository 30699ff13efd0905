// ABOUTME: Expands a job into the concrete (database, table) pairs it acts on
// ABOUTME: Static pair from the job itself, or rows returned by a lookup query on the source

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;

use crate::config::{Endpoint, JobConfig};
use crate::error::PurgeError;

/// A table to retire, one iteration of the per-job loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub database: String,
    pub table: String,
}

impl Target {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

/// One result row; `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

/// Runs a lookup query against a source server and returns its rows as text columns.
#[async_trait]
pub trait TableLookup: Send + Sync {
    async fn fetch_rows(&self, endpoint: &Endpoint, query: &str) -> Result<Vec<Row>>;
}

/// Lookup through the `mysql` command-line client.
///
/// The client reads credentials from the `[client]` group of the usual option files,
/// so no secrets pass through the job list.
pub struct MysqlClientLookup {
    mysql_bin: PathBuf,
}

impl MysqlClientLookup {
    pub fn new(mysql_bin: impl Into<PathBuf>) -> Self {
        Self {
            mysql_bin: mysql_bin.into(),
        }
    }
}

#[async_trait]
impl TableLookup for MysqlClientLookup {
    async fn fetch_rows(&self, endpoint: &Endpoint, query: &str) -> Result<Vec<Row>> {
        let output = Command::new(&self.mysql_bin)
            .arg(format!("-h{}", endpoint.host))
            .arg(format!("-P{}", endpoint.port))
            .arg("--batch")
            .arg("--skip-column-names")
            .arg(format!("-e{}", query))
            .output()
            .await
            .map_err(|e| {
                PurgeError::TargetEnumeration(format!(
                    "failed to run {}: {}",
                    self.mysql_bin.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(PurgeError::TargetEnumeration(format!(
                "lookup query on {}:{} failed: {}",
                endpoint.host,
                endpoint.port,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into());
        }

        Ok(parse_batch_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Split `--batch` output (one row per line, tab separated) into columns.
///
/// Cells are unescaped the way the client escapes them (`\0`, `\t`, `\n`, `\\`) and a
/// bare `NULL` cell becomes `None`.
pub fn parse_batch_output(stdout: &str) -> Vec<Row> {
    stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.split('\t').map(parse_batch_cell).collect())
        .collect()
}

fn parse_batch_cell(cell: &str) -> Option<String> {
    if cell == "NULL" {
        return None;
    }

    let mut value = String::with_capacity(cell.len());
    let mut chars = cell.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => value.push('\0'),
            Some('t') => value.push('\t'),
            Some('n') => value.push('\n'),
            Some('\\') => value.push('\\'),
            Some(other) => {
                value.push('\\');
                value.push(other);
            }
            None => value.push('\\'),
        }
    }
    Some(value)
}

/// Targets for one job, plus the failure that cut enumeration short, if any.
#[derive(Debug, Default)]
pub struct Enumeration {
    pub targets: Vec<Target>,
    pub failure: Option<PurgeError>,
}

/// Produce the targets for `job`.
///
/// Without a lookup query the job's own source pair is the only target. With one,
/// each row's first two columns are database and table. A failed query yields no
/// targets; a malformed row (short, NULL or empty names) keeps the targets collected
/// before it.
pub async fn enumerate_targets(job: &JobConfig, lookup: &dyn TableLookup) -> Enumeration {
    let Some(query) = job.source_query.as_deref() else {
        return match (&job.source_db, &job.source_table) {
            (Some(db), Some(table)) => Enumeration {
                targets: vec![Target::new(db, table)],
                failure: None,
            },
            _ => Enumeration {
                targets: Vec::new(),
                failure: Some(PurgeError::TargetEnumeration(format!(
                    "<{}> no SOURCE_DB/SOURCE_TABLE to purge",
                    job.alias
                ))),
            },
        };
    };

    let rows = match lookup.fetch_rows(&job.source, query).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(alias = %job.alias, error = %e, "Target lookup query failed");
            let failure = match e.downcast::<PurgeError>() {
                Ok(purge) => purge,
                Err(other) => PurgeError::TargetEnumeration(other.to_string()),
            };
            return Enumeration {
                targets: Vec::new(),
                failure: Some(failure),
            };
        }
    };

    let mut targets = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        match row.as_slice() {
            [Some(database), Some(table), ..] if !database.is_empty() && !table.is_empty() => {
                targets.push(Target::new(database, table));
            }
            _ => {
                let msg = format!(
                    "<{}> lookup row {} must start with database and table columns, got {:?}",
                    job.alias,
                    index + 1,
                    row
                );
                tracing::error!(alias = %job.alias, kept = targets.len(), "{}", msg);
                return Enumeration {
                    targets,
                    failure: Some(PurgeError::TargetEnumeration(msg)),
                };
            }
        }
    }

    tracing::info!(alias = %job.alias, count = targets.len(), "Lookup query returned targets");
    Enumeration {
        targets,
        failure: None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{JobConfig, JobOverrides};

    /// Lookup returning canned rows, or an error when `rows` is `None`.
    pub struct CannedLookup {
        pub rows: Option<Vec<Row>>,
    }

    impl CannedLookup {
        pub fn rows(rows: &[&[&str]]) -> Self {
            Self {
                rows: Some(
                    rows.iter()
                        .map(|r| r.iter().map(|c| Some(c.to_string())).collect())
                        .collect(),
                ),
            }
        }

        /// Rows as the `mysql` client prints them in batch mode.
        pub fn batch(stdout: &str) -> Self {
            Self {
                rows: Some(parse_batch_output(stdout)),
            }
        }

        pub fn failing() -> Self {
            Self { rows: None }
        }
    }

    #[async_trait]
    impl TableLookup for CannedLookup {
        async fn fetch_rows(&self, _endpoint: &Endpoint, _query: &str) -> Result<Vec<Row>> {
            match &self.rows {
                Some(rows) => Ok(rows.clone()),
                None => Err(PurgeError::TargetEnumeration("connection refused".into()).into()),
            }
        }
    }

    fn query_job() -> JobConfig {
        JobConfig::from_merged(
            JobOverrides {
                alias: Some("logs".to_string()),
                source_query: Some("SELECT db, tbl FROM meta.purgeable".to_string()),
                ..Default::default()
            },
            "20240102",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_static_mode_single_target() {
        let job = JobConfig::from_merged(
            JobOverrides {
                alias: Some("orders".to_string()),
                source_db: Some("shop".to_string()),
                source_table: Some("orders".to_string()),
                ..Default::default()
            },
            "20240102",
        )
        .unwrap();

        let result = enumerate_targets(&job, &CannedLookup::failing()).await;
        assert_eq!(result.targets, vec![Target::new("shop", "orders")]);
        assert!(result.failure.is_none());
    }

    #[tokio::test]
    async fn test_query_mode_one_target_per_row() {
        let lookup = CannedLookup::rows(&[&["app", "events_2023"], &["app", "audit", "extra"]]);
        let result = enumerate_targets(&query_job(), &lookup).await;
        assert_eq!(
            result.targets,
            vec![Target::new("app", "events_2023"), Target::new("app", "audit")]
        );
        assert!(result.failure.is_none());
    }

    #[tokio::test]
    async fn test_query_failure_yields_no_targets() {
        let result = enumerate_targets(&query_job(), &CannedLookup::failing()).await;
        assert!(result.targets.is_empty());
        assert!(matches!(
            result.failure,
            Some(PurgeError::TargetEnumeration(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_row_keeps_earlier_targets() {
        let lookup = CannedLookup::rows(&[&["app", "a"], &["only-one-column"], &["app", "c"]]);
        let result = enumerate_targets(&query_job(), &lookup).await;
        assert_eq!(result.targets, vec![Target::new("app", "a")]);
        assert!(result.failure.is_some());
    }

    #[test]
    fn test_parse_batch_output() {
        let rows = parse_batch_output("app\tevents\nlogs\taccess\n\n");
        assert_eq!(
            rows,
            vec![
                vec![Some("app".to_string()), Some("events".to_string())],
                vec![Some("logs".to_string()), Some("access".to_string())],
            ]
        );
    }

    #[test]
    fn test_parse_batch_output_decodes_escapes_and_null() {
        let rows = parse_batch_output("weird\\\\name\ttab\\there\tline\\nbreak\tnul\\0\tNULL\n");
        assert_eq!(
            rows,
            vec![vec![
                Some("weird\\name".to_string()),
                Some("tab\there".to_string()),
                Some("line\nbreak".to_string()),
                Some("nul\0".to_string()),
                None,
            ]]
        );
        assert_eq!(
            parse_batch_output("odd\\x\ttrailing\\\n"),
            vec![vec![Some("odd\\x".to_string()), Some("trailing\\".to_string())]]
        );
    }

    #[tokio::test]
    async fn test_batch_escapes_reach_target_names() {
        let lookup = CannedLookup::batch("app\tweird\\\\name\n");
        let result = enumerate_targets(&query_job(), &lookup).await;
        assert_eq!(result.targets, vec![Target::new("app", "weird\\name")]);
        assert!(result.failure.is_none());
    }

    #[tokio::test]
    async fn test_null_table_column_is_malformed_row() {
        let lookup = CannedLookup::batch("app\tevents\napp\tNULL\napp\taudit\n");
        let result = enumerate_targets(&query_job(), &lookup).await;
        assert_eq!(result.targets, vec![Target::new("app", "events")]);
        assert!(matches!(
            result.failure,
            Some(PurgeError::TargetEnumeration(_))
        ));
    }
}
