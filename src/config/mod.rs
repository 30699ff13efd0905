// ABOUTME: Job-list document loading and resolution into per-alias JobConfigs
// ABOUTME: Supports the YAML layout used by existing deployments and an equivalent TOML layout

//! The job list is a mapping with two sections:
//!
//! ```yaml
//! ALL:
//!   SOURCE_HOST: db-1
//!   LIMIT: 500
//! PURGE_LIST:
//!   - ALIAS: orders
//!     SOURCE_DB: shop
//!     SOURCE_TABLE: orders
//!     WHERE: "created_at < NOW() - INTERVAL 90 DAY"
//! ```
//!
//! A path ending in `.toml` is parsed as TOML with the same keys.

mod job;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::PurgeError;

pub use job::{
    Endpoint, Flag, JobConfig, JobOverrides, JobTemplate, DEFAULT_LIMIT, DEFAULT_SLEEP,
    DEFAULT_SOURCE_HOST, DEFAULT_SOURCE_PORT,
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/rdba/purge_tables.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct JobListDocument {
    #[serde(rename = "ALL")]
    pub defaults: JobTemplate,
    #[serde(rename = "PURGE_LIST")]
    pub jobs: Vec<JobOverrides>,
}

impl JobListDocument {
    /// Read and parse the document at `path`.
    ///
    /// Any failure is reported as [`PurgeError::ConfigLoad`]; callers abort the run on it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PurgeError::ConfigLoad(format!("{}: {}", path.display(), e)))
            .with_context(|| format!("Could not read config file {:?}", path))?;

        let parsed = if is_toml(path) {
            Self::from_toml_str(&contents)
        } else {
            Self::from_yaml_str(&contents)
        };
        parsed.with_context(|| format!("Could not read config file {:?}", path))
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| anyhow::Error::new(PurgeError::ConfigLoad(e.to_string())))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| anyhow::Error::new(PurgeError::ConfigLoad(e.to_string())))
    }

    /// Merge the defaults under every job and return the resolved configs in document order.
    ///
    /// With `alias` set only matching jobs are returned. Business rules are not checked here;
    /// see [`JobConfig::validate`].
    pub fn resolve(&self, alias: Option<&str>, default_suffix: &str) -> Result<Vec<JobConfig>> {
        let mut resolved = Vec::with_capacity(self.jobs.len());

        for (index, overrides) in self.jobs.iter().enumerate() {
            let merged = self.defaults.overlay(overrides);
            let config = JobConfig::from_merged(merged, default_suffix)
                .with_context(|| format!("PURGE_LIST entry #{} is malformed", index + 1))?;

            if alias.is_some_and(|wanted| wanted != config.alias) {
                continue;
            }
            resolved.push(config);
        }

        Ok(resolved)
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

/// Path of the document to load: the one given on the command line, else the system default.
pub fn config_path(requested: Option<PathBuf>) -> PathBuf {
    requested.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
ALL:
  SOURCE_HOST: db-1
  LIMIT: 200
  DISABLE_BINLOG: 1
PURGE_LIST:
  - ALIAS: orders
    SOURCE_DB: shop
    SOURCE_TABLE: orders
    WHERE: "id<100"
    LIMIT: 500
  - ALIAS: sessions
    SOURCE_DB: web
    SOURCE_TABLE: sessions
    SWAP_DROP: 1
    DEST_HOST: archive-1
"#;

    fn is_config_load(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<PurgeError>(),
            Some(PurgeError::ConfigLoad(_))
        )
    }

    #[test]
    fn test_resolve_merges_defaults_in_order() {
        let doc = JobListDocument::from_yaml_str(YAML).unwrap();
        let jobs = doc.resolve(None, "20240102").unwrap();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].alias, "orders");
        assert_eq!(jobs[0].limit, 500);
        assert_eq!(jobs[0].source.host, "db-1");
        assert!(jobs[0].disable_binlog);
        assert_eq!(jobs[1].limit, 200);
        assert_eq!(jobs[1].destination.host, "archive-1");
        assert_eq!(jobs[1].destination.port, 3306);
        assert_eq!(jobs[1].dest_table.as_deref(), Some("sessions"));
    }

    #[test]
    fn test_resolve_filters_by_alias() {
        let doc = JobListDocument::from_yaml_str(YAML).unwrap();
        let jobs = doc.resolve(Some("sessions"), "20240102").unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].alias, "sessions");

        assert!(doc.resolve(Some("nope"), "20240102").unwrap().is_empty());
    }

    #[test]
    fn test_resolve_leaves_template_unchanged() {
        let doc = JobListDocument::from_yaml_str(YAML).unwrap();
        let before = doc.defaults.clone();
        doc.resolve(None, "20240102").unwrap();
        assert_eq!(doc.defaults, before);
    }

    #[test]
    fn test_missing_sections_are_config_errors() {
        let err = JobListDocument::from_yaml_str("ALL: {}\n").unwrap_err();
        assert!(is_config_load(&err));

        let err = JobListDocument::from_yaml_str("PURGE_LIST: []\n").unwrap_err();
        assert!(is_config_load(&err));
    }

    #[test]
    fn test_unknown_job_key_is_config_error() {
        let err = JobListDocument::from_yaml_str(
            "ALL: {}\nPURGE_LIST:\n  - ALIAS: a\n    WHRE: \"id<1\"\n",
        )
        .unwrap_err();
        assert!(is_config_load(&err));
    }

    #[test]
    fn test_boolean_flags_accepted() {
        let doc = JobListDocument::from_yaml_str(
            "ALL: {}\nPURGE_LIST:\n  - ALIAS: a\n    DELETE_DATA: true\n    DISABLE_BINLOG: 0\n",
        )
        .unwrap();
        let jobs = doc.resolve(None, "20240102").unwrap();
        assert!(jobs[0].delete_data);
        assert!(!jobs[0].disable_binlog);
    }

    #[test]
    fn test_load_toml_document() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[ALL]
SOURCE_PORT = 3307

[[PURGE_LIST]]
ALIAS = "orders"
SOURCE_DB = "shop"
SOURCE_TABLE = "orders"
WHERE = "id<100"
"#
        )
        .unwrap();

        let doc = JobListDocument::load(file.path()).unwrap();
        let jobs = doc.resolve(None, "20240102").unwrap();
        assert_eq!(jobs[0].source.port, 3307);
        assert_eq!(jobs[0].destination.port, 3307);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = JobListDocument::load(dir.path().join("absent.yml")).unwrap_err();
        assert!(is_config_load(&err));
    }

    #[test]
    fn test_config_path_default() {
        assert_eq!(config_path(None), PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(
            config_path(Some(PathBuf::from("/tmp/x.yml"))),
            PathBuf::from("/tmp/x.yml")
        );
    }
}
