// ABOUTME: Per-job option records and the fully resolved JobConfig
// ABOUTME: Merges defaults with overrides, fills destination from source, validates business rules

use serde::Deserialize;

use crate::error::PurgeError;
use crate::strategy::RetirementStrategy;

pub const DEFAULT_SOURCE_HOST: &str = "localhost";
pub const DEFAULT_SOURCE_PORT: u16 = 3306;
pub const DEFAULT_LIMIT: u64 = 1000;
pub const DEFAULT_SLEEP: u64 = 1;

/// A 0/1 style switch. Job lists in the wild use both integers and booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    pub fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

/// One mapping of job options as written in the document.
///
/// Used both for the `ALL` defaults section and for each `PURGE_LIST` entry.
/// Every field is optional; absent fields fall through to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct JobOverrides {
    pub alias: Option<String>,
    pub source_host: Option<String>,
    pub source_port: Option<u16>,
    pub source_db: Option<String>,
    pub source_table: Option<String>,
    pub source_query: Option<String>,
    pub dest_host: Option<String>,
    pub dest_port: Option<u16>,
    pub dest_db: Option<String>,
    pub dest_table: Option<String>,
    pub dest_file: Option<String>,
    #[serde(rename = "WHERE")]
    pub where_clause: Option<String>,
    pub limit: Option<u64>,
    pub sleep: Option<u64>,
    pub delete_data: Option<Flag>,
    pub extra_args: Option<String>,
    pub disable_binlog: Option<Flag>,
    pub use_index: Option<String>,
    pub swap_drop: Option<i64>,
    pub swp_table_suffix: Option<String>,
}

/// Default option values shared by every job. Read-only once loaded.
pub type JobTemplate = JobOverrides;

impl JobOverrides {
    /// Returns a new record holding `self` with every field set in `over` replaced.
    ///
    /// Neither input is modified, so a template can be layered under any number of jobs.
    pub fn overlay(&self, over: &JobOverrides) -> JobOverrides {
        fn pick<T: Clone>(over: &Option<T>, base: &Option<T>) -> Option<T> {
            over.clone().or_else(|| base.clone())
        }

        JobOverrides {
            alias: pick(&over.alias, &self.alias),
            source_host: pick(&over.source_host, &self.source_host),
            source_port: pick(&over.source_port, &self.source_port),
            source_db: pick(&over.source_db, &self.source_db),
            source_table: pick(&over.source_table, &self.source_table),
            source_query: pick(&over.source_query, &self.source_query),
            dest_host: pick(&over.dest_host, &self.dest_host),
            dest_port: pick(&over.dest_port, &self.dest_port),
            dest_db: pick(&over.dest_db, &self.dest_db),
            dest_table: pick(&over.dest_table, &self.dest_table),
            dest_file: pick(&over.dest_file, &self.dest_file),
            where_clause: pick(&over.where_clause, &self.where_clause),
            limit: pick(&over.limit, &self.limit),
            sleep: pick(&over.sleep, &self.sleep),
            delete_data: pick(&over.delete_data, &self.delete_data),
            extra_args: pick(&over.extra_args, &self.extra_args),
            disable_binlog: pick(&over.disable_binlog, &self.disable_binlog),
            use_index: pick(&over.use_index, &self.use_index),
            swap_drop: pick(&over.swap_drop, &self.swap_drop),
            swp_table_suffix: pick(&over.swp_table_suffix, &self.swp_table_suffix),
        }
    }
}

/// Host and port of a MySQL server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Fully resolved settings for one purge job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    pub alias: String,
    pub source: Endpoint,
    pub source_db: Option<String>,
    pub source_table: Option<String>,
    pub source_query: Option<String>,
    pub destination: Endpoint,
    /// Defaults to `source_db`. Still `None` only in query mode without a static source.
    pub dest_db: Option<String>,
    /// Defaults to `source_table`. Still `None` only in query mode without a static source.
    pub dest_table: Option<String>,
    pub dest_file: Option<String>,
    pub where_clause: Option<String>,
    pub limit: u64,
    pub sleep: u64,
    pub delete_data: bool,
    pub extra_args: Option<String>,
    pub disable_binlog: bool,
    pub use_index: Option<String>,
    /// Raw `SWAP_DROP` value; checked by [`JobConfig::validate`].
    pub strategy_selector: i64,
    pub swap_suffix: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl JobConfig {
    /// Build a job from a merged option record.
    ///
    /// Destination coordinates are defaulted from the final source values in one pass,
    /// after merging. `default_suffix` is the run date used when `SWP_TABLE_SUFFIX` is unset.
    pub fn from_merged(merged: JobOverrides, default_suffix: &str) -> Result<Self, PurgeError> {
        let alias = non_empty(merged.alias).ok_or_else(|| {
            PurgeError::ConfigLoad("every PURGE_LIST entry needs an ALIAS".to_string())
        })?;

        let source = Endpoint {
            host: non_empty(merged.source_host).unwrap_or_else(|| DEFAULT_SOURCE_HOST.to_string()),
            port: merged.source_port.unwrap_or(DEFAULT_SOURCE_PORT),
        };
        let source_db = non_empty(merged.source_db);
        let source_table = non_empty(merged.source_table);

        let destination = Endpoint {
            host: non_empty(merged.dest_host).unwrap_or_else(|| source.host.clone()),
            port: merged.dest_port.filter(|p| *p != 0).unwrap_or(source.port),
        };
        let dest_db = non_empty(merged.dest_db).or_else(|| source_db.clone());
        let dest_table = non_empty(merged.dest_table).or_else(|| source_table.clone());

        Ok(JobConfig {
            alias,
            source,
            source_db,
            source_table,
            source_query: non_empty(merged.source_query),
            destination,
            dest_db,
            dest_table,
            dest_file: non_empty(merged.dest_file),
            where_clause: non_empty(merged.where_clause),
            limit: merged.limit.unwrap_or(DEFAULT_LIMIT),
            sleep: merged.sleep.unwrap_or(DEFAULT_SLEEP),
            delete_data: merged.delete_data.is_some_and(Flag::is_set),
            extra_args: non_empty(merged.extra_args),
            disable_binlog: merged.disable_binlog.is_some_and(Flag::is_set),
            use_index: non_empty(merged.use_index),
            strategy_selector: merged.swap_drop.unwrap_or(0),
            swap_suffix: non_empty(merged.swp_table_suffix)
                .unwrap_or_else(|| default_suffix.to_string()),
        })
    }

    /// Check the per-job business rules and return the selected strategy.
    ///
    /// Runs before any target is enumerated, so a rejected job never builds a command.
    pub fn validate(&self) -> Result<RetirementStrategy, PurgeError> {
        let strategy = RetirementStrategy::from_selector(self.strategy_selector).ok_or_else(|| {
            PurgeError::Validation(format!(
                "<{}> Please ensure SWAP_DROP is set between 0 and 2.",
                self.alias
            ))
        })?;

        if strategy == RetirementStrategy::ArchiveOnly && self.where_clause.is_none() {
            return Err(PurgeError::Validation(format!(
                "<{}> Please add a WHERE clause.",
                self.alias
            )));
        }

        if self.source_query.is_none() && (self.source_db.is_none() || self.source_table.is_none())
        {
            return Err(PurgeError::Validation(format!(
                "<{}> SOURCE_DB and SOURCE_TABLE are required when SOURCE_QUERY is not set.",
                self.alias
            )));
        }

        if strategy == RetirementStrategy::SwapArchiveDrop
            && !self
                .swap_suffix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(PurgeError::Validation(format!(
                "<{}> SWP_TABLE_SUFFIX may only contain letters, digits and underscores.",
                self.alias
            )));
        }

        Ok(strategy)
    }
}
