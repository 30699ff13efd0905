// ABOUTME: Custom error types for the purge engine
// ABOUTME: Distinguishes run-aborting failures from per-job and per-target ones

use std::fmt;

#[derive(Debug)]
pub enum PurgeError {
    /// Job-list document unreadable or structurally malformed. Aborts the run.
    ConfigLoad(String),
    /// A job violates a business rule (strategy selector, missing WHERE, empty identifiers).
    Validation(String),
    /// The target lookup query could not be run or returned malformed rows.
    TargetEnumeration(String),
    /// An external command exited non-zero or could not be spawned.
    Command(String),
}

impl fmt::Display for PurgeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PurgeError::ConfigLoad(msg) => write!(f, "Config load error: {}", msg),
            PurgeError::Validation(msg) => write!(f, "Validation error: {}", msg),
            PurgeError::TargetEnumeration(msg) => {
                write!(f, "Target enumeration error: {}", msg)
            }
            PurgeError::Command(msg) => write!(f, "Command error: {}", msg),
        }
    }
}

impl std::error::Error for PurgeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes_kind() {
        let err = PurgeError::Validation("<orders> Please add a WHERE clause.".to_string());
        assert_eq!(
            err.to_string(),
            "Validation error: <orders> Please add a WHERE clause."
        );
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err = anyhow::Error::new(PurgeError::ConfigLoad("missing PURGE_LIST".into()))
            .context("Could not read config file");
        assert!(matches!(
            err.downcast_ref::<PurgeError>(),
            Some(PurgeError::ConfigLoad(_))
        ));
    }
}
